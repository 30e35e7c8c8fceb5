//! Control-flow complexity metrics.
//!
//! The cyclomatic complexity of a module is `E - N + 2P` where `E` counts
//! terminator successor slots, `N` counts blocks and `P` counts functions with
//! a body. It is what lambdaization is meant to change: every extracted loop
//! removes a back edge from its host and adds a new connected component.

use std::fmt;

use crate::ir::{Function, Module};

/// Size and complexity of a module's control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComplexityReport {
    /// Functions with a body.
    pub functions: usize,
    /// Successor slots over all terminators. A `switch` with two cases to the
    /// same block counts both.
    pub edges: usize,
    /// Basic blocks.
    pub nodes: usize,
}

impl ComplexityReport {
    /// `E - N + 2P`.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn cyclomatic(&self) -> i64 {
        self.edges as i64 - self.nodes as i64 + 2 * self.functions as i64
    }

    /// Adds the counts of one function.
    pub fn add_function(&mut self, function: &Function) {
        if function.is_declaration() {
            return;
        }
        self.functions += 1;
        for (_, block) in function.blocks() {
            self.nodes += 1;
            self.edges += block.terminator.as_ref().map_or(0, |t| t.successors().len());
        }
    }
}

impl fmt::Display for ComplexityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Functions Count: {}", self.functions)?;
        writeln!(f, "Edges Count: {}", self.edges)?;
        writeln!(f, "Nodes Count: {}", self.nodes)?;
        write!(f, "Cyclomatic Complexity: {}", self.cyclomatic())
    }
}

/// Measures every defined function of `module`.
#[must_use]
pub fn cyclomatic_complexity(module: &Module) -> ComplexityReport {
    let mut report = ComplexityReport::default();
    for (_, function) in module.functions() {
        report.add_function(function);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    #[test]
    fn test_single_loop() -> Result<()> {
        let module = Module::parse(
            r"
declare void @print_i64(i64)

define i32 @f(i32 %n) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %next, %loop ]
  %next = add i32 %i, 1
  %done = icmp sge i32 %next, %n
  br i1 %done, label %exit, label %loop
exit:
  ret i32 %next
}
",
        )?;
        let report = cyclomatic_complexity(&module);
        assert_eq!(report.functions, 1);
        assert_eq!(report.nodes, 3);
        assert_eq!(report.edges, 3);
        assert_eq!(report.cyclomatic(), 2);
        assert!(report.to_string().ends_with("Cyclomatic Complexity: 2"));
        Ok(())
    }
}
