//! The capture cursor.
//!
//! A [`VaList`] is a read position over an immutable argument pack. Copying a
//! cursor (`clone`) yields an independent position over the same pack, which
//! is how the repetition driver hands every iteration a fresh cursor that
//! starts at the first capture.

use std::rc::Rc;

/// A cursor over a shared argument pack.
#[derive(Debug)]
pub struct VaList<T> {
    args: Rc<[T]>,
    next: usize,
}

impl<T> VaList<T> {
    /// Creates a cursor at the start of `args`.
    #[must_use]
    pub fn new(args: Vec<T>) -> Self {
        Self {
            args: Rc::from(args),
            next: 0,
        }
    }

    /// Number of arguments in the pack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Returns `true` if the pack is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Index of the next argument to be read.
    #[must_use]
    pub fn position(&self) -> usize {
        self.next
    }

    /// Arguments not read yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.args.len().saturating_sub(self.next)
    }

    /// Reads the next argument and advances the cursor.
    pub fn next_arg(&mut self) -> Option<T>
    where
        T: Clone,
    {
        let arg = self.args.get(self.next)?.clone();
        self.next += 1;
        Some(arg)
    }

    /// A cursor over the same pack, rewound to the first argument.
    #[must_use]
    pub fn rewound(&self) -> Self {
        Self {
            args: Rc::clone(&self.args),
            next: 0,
        }
    }
}

impl<T> Clone for VaList<T> {
    fn clone(&self) -> Self {
        Self {
            args: Rc::clone(&self.args),
            next: self.next,
        }
    }
}

impl<T: Clone> Iterator for VaList<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.next_arg()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}
