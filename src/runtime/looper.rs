//! The repetition driver.
//!
//! `looper(loopee, captures...)` calls `loopee` with a fresh capture cursor
//! until it returns `false`. One step:
//!
//! 1. copy the cursor
//! 2. call the loopee with the original, which it consumes
//! 3. on `true`, take the next step with the copy at `depth + 1`;
//!    otherwise drop the copy and stop
//!
//! Steps recurse through [`fix`] up to the configured depth and continue as a
//! plain loop from there, so the stack never grows past the cutoff.

use std::cell::RefCell;

use crate::runtime::{combinator::fix, valist::VaList, DriverStrategy, DEFAULT_MAX_RECURSION};

/// Statistics of one driver run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveReport {
    /// Number of loopee calls.
    pub iterations: u64,
    /// Deepest recursion level reached; bounded by the cutoff.
    pub max_depth: usize,
}

impl DriveReport {
    fn stopped_at(depth: usize) -> Self {
        Self {
            iterations: 1,
            max_depth: depth,
        }
    }

    fn one_more(mut self) -> Self {
        self.iterations += 1;
        self
    }
}

/// A configured repetition driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Looper {
    strategy: DriverStrategy,
    max_recursion: usize,
}

impl Default for Looper {
    fn default() -> Self {
        Self::new(DriverStrategy::default(), DEFAULT_MAX_RECURSION)
    }
}

impl Looper {
    /// Creates a driver. A cutoff of `0` behaves like `1`.
    #[must_use]
    pub fn new(strategy: DriverStrategy, max_recursion: usize) -> Self {
        Self {
            strategy,
            max_recursion: max_recursion.max(1),
        }
    }

    /// The implementation in use.
    #[must_use]
    pub fn strategy(&self) -> DriverStrategy {
        self.strategy
    }

    /// Depth at which recursion turns into iteration.
    #[must_use]
    pub fn max_recursion(&self) -> usize {
        self.max_recursion
    }

    /// Drives `loopee` until it returns `false`.
    ///
    /// # Errors
    ///
    /// The first error returned by `loopee` stops the repetition and is
    /// returned unchanged.
    pub fn run<T, E, F>(&self, loopee: F, cursor: VaList<T>) -> Result<DriveReport, E>
    where
        F: FnMut(VaList<T>) -> Result<bool, E>,
    {
        match self.strategy {
            DriverStrategy::Iterative => Self::iterate(loopee, cursor, 0),
            DriverStrategy::OneArgument => self.one_argument(loopee, cursor),
            DriverStrategy::MultipleArguments => self.multiple_arguments(loopee, cursor),
        }
    }

    /// Plain loop, starting at `depth`.
    fn iterate<T, E, F>(mut loopee: F, mut cursor: VaList<T>, depth: usize) -> Result<DriveReport, E>
    where
        F: FnMut(VaList<T>) -> Result<bool, E>,
    {
        let mut report = DriveReport {
            iterations: 0,
            max_depth: depth,
        };
        loop {
            let copy = cursor.clone();
            report.iterations += 1;
            if !loopee(cursor)? {
                return Ok(report);
            }
            cursor = copy;
        }
    }

    /// Loopee captured by the step; the recursion carries `(cursor, depth)`.
    fn one_argument<T, E, F>(&self, loopee: F, cursor: VaList<T>) -> Result<DriveReport, E>
    where
        F: FnMut(VaList<T>) -> Result<bool, E>,
    {
        let cutoff = self.max_recursion;
        let loopee = RefCell::new(loopee);
        let call = |cursor: VaList<T>| {
            let mut f = loopee.borrow_mut();
            (*f)(cursor)
        };
        let step = |rec: &dyn Fn((VaList<T>, usize)) -> Result<DriveReport, E>,
                    (cursor, depth): (VaList<T>, usize)| {
            if depth >= cutoff {
                return Self::iterate(call, cursor, depth);
            }
            let copy = cursor.clone();
            if call(cursor)? {
                rec((copy, depth + 1)).map(DriveReport::one_more)
            } else {
                Ok(DriveReport::stopped_at(depth))
            }
        };
        fix(&step, (cursor, 0))
    }

    /// Loopee, cursor and depth forwarded on every step.
    fn multiple_arguments<T, E, F>(&self, loopee: F, cursor: VaList<T>) -> Result<DriveReport, E>
    where
        F: FnMut(VaList<T>) -> Result<bool, E>,
    {
        let cutoff = self.max_recursion;
        let step = |rec: &dyn Fn((F, VaList<T>, usize)) -> Result<DriveReport, E>,
                    (mut loopee, cursor, depth): (F, VaList<T>, usize)| {
            if depth >= cutoff {
                return Self::iterate(loopee, cursor, depth);
            }
            let copy = cursor.clone();
            if loopee(cursor)? {
                rec((loopee, copy, depth + 1)).map(DriveReport::one_more)
            } else {
                Ok(DriveReport::stopped_at(depth))
            }
        };
        fix(&step, (loopee, cursor, 0))
    }
}
