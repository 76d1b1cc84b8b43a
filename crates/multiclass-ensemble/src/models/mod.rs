//! Binary trainable units.
//!
//! Every unit satisfies [`classifier_trait::TrainableUnit`]. The concrete
//! linear models share one [`fit_loop::FitLoop`] driver and plug a
//! kind-specific solver from [`descent`] into it.
pub mod classifier_trait;
pub mod descent;
pub mod factory;
pub mod fit_loop;
pub mod linear;
