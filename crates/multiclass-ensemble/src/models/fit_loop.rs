/// Cross-validation driver shared by every model kind.
///
/// Holds the fold index and the convergence flag of the fold in progress.
/// Model kinds receive it by `&mut` in their update step instead of keeping
/// their own fold bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct FitLoop {
    n_folds: usize,
    fold: usize,
    started: bool,
    converged: bool,
}

impl FitLoop {
    /// `cv_splits <= 1` means a single fold over all rows. The fold count
    /// never exceeds the number of rows.
    pub fn new(cv_splits: usize, n_rows: usize) -> Self {
        Self {
            n_folds: cv_splits.max(1).min(n_rows.max(1)),
            fold: 0,
            started: false,
            converged: false,
        }
    }

    /// Move to the next fold. Returns `false` once every fold has run.
    pub fn advance(&mut self) -> bool {
        if self.started {
            self.fold += 1;
        } else {
            self.started = true;
        }
        self.converged = false;
        self.fold < self.n_folds
    }

    pub fn fold(&self) -> usize {
        self.fold
    }

    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    pub fn converge(&mut self) {
        self.converged = true;
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Row indices (fit, holdout) of the current fold. Fold `i` holds out
    /// rows whose index is `i` modulo the fold count.
    pub fn split(&self, n_rows: usize) -> (Vec<usize>, Vec<usize>) {
        if self.n_folds == 1 {
            return ((0..n_rows).collect(), Vec::new());
        }
        (0..n_rows).partition(|row| row % self.n_folds != self.fold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_fold() {
        let mut fl = FitLoop::new(1, 5);
        assert!(fl.advance());
        let (fit, holdout) = fl.split(5);
        assert_eq!(fit, vec![0, 1, 2, 3, 4]);
        assert!(holdout.is_empty());
        assert!(!fl.advance());
    }

    #[test]
    fn test_three_folds() {
        let mut fl = FitLoop::new(3, 7);
        let mut holdouts = Vec::new();
        while fl.advance() {
            let (fit, holdout) = fl.split(7);
            assert_eq!(fit.len() + holdout.len(), 7);
            holdouts.push(holdout);
        }
        assert_eq!(holdouts, vec![vec![0, 3, 6], vec![1, 4], vec![2, 5]]);
    }

    #[test]
    fn test_convergence_resets_per_fold() {
        let mut fl = FitLoop::new(2, 4);
        fl.advance();
        fl.converge();
        assert!(fl.converged());
        fl.advance();
        assert!(!fl.converged());
        assert_eq!(fl.fold(), 1);
    }

    #[test]
    fn test_folds_capped_by_rows() {
        assert_eq!(FitLoop::new(10, 3).n_folds(), 3);
        assert_eq!(FitLoop::new(0, 0).n_folds(), 1);
    }
}
