//! Fixed-point combinator.
//!
//! [`fix`] ties the knot for a step function that receives "the rest of the
//! recursion" as its first argument. The recursive reference is eta-expanded
//! (`|a| fix(step, a)`) so evaluation stays strict, which makes this the Z
//! combinator rather than Y.

/// Calls `step` with a handle to itself and `arg`.
///
/// # Examples
///
/// ```rust
/// use lambdaize::runtime::fix;
///
/// let fact = |rec: &dyn Fn(u64) -> u64, n: u64| if n == 0 { 1 } else { n * rec(n - 1) };
/// assert_eq!(fix(&fact, 5), 120);
/// ```
pub fn fix<A, R>(step: &dyn Fn(&dyn Fn(A) -> R, A) -> R, arg: A) -> R {
    step(&|a| fix(step, a), arg)
}
