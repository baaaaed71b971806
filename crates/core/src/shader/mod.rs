//! Contract with the external shader compilation service.
//!
//! The engine never looks inside bytecode. Every compilable unit (scene,
//! post-processing effect, compute effect, transition blend) tracks a
//! [`CompileState`] and moves between states through [`compile_unit`].

mod headless;

pub use headless::HeadlessCompiler;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline stage a source is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderTarget {
    Fragment,
    Compute,
}

impl ShaderTarget {
    pub fn profile(self) -> &'static str {
        match self {
            ShaderTarget::Fragment => "ps_6_0",
            ShaderTarget::Compute => "cs_6_0",
        }
    }
}

/// `Live` favours fast turnaround in the editor, `Build` optimised output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompileMode {
    #[default]
    Live,
    Build,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// One message emitted by the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            line: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match self.line {
            Some(line) => write!(f, "{kind} (line {line}): {}", self.message),
            None => write!(f, "{kind}: {}", self.message),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub entry_point: &'a str,
    pub target: ShaderTarget,
    pub mode: CompileMode,
}

/// Raw answer from the compilation service.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    pub bytecode: Vec<u8>,
    pub diagnostics: Vec<Diagnostic>,
    pub success: bool,
}

/// Successfully compiled shader, ready to become a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledShader {
    pub target: ShaderTarget,
    pub bytecode: Vec<u8>,
    pub warnings: Vec<Diagnostic>,
}

impl CompiledShader {
    pub fn byte_size(&self) -> usize {
        self.bytecode.len()
    }
}

/// `compile(source, entryPoint, target, mode) -> bytecode | diagnostics`.
pub trait CompilationService {
    fn compile(&mut self, request: &CompileRequest<'_>) -> CompileOutput;
}

impl<T: CompilationService + ?Sized> CompilationService for Box<T> {
    fn compile(&mut self, request: &CompileRequest<'_>) -> CompileOutput {
        (**self).compile(request)
    }
}

/// Runs one compilation and folds the service's answer into a `Result`.
///
/// A service that reports success without bytecode is treated as a failure.
pub fn compile_unit<C>(
    service: &mut C,
    request: &CompileRequest<'_>,
) -> std::result::Result<CompiledShader, Vec<Diagnostic>>
where
    C: CompilationService + ?Sized,
{
    let output = service.compile(request);
    if output.success && !output.bytecode.is_empty() {
        Ok(CompiledShader {
            target: request.target,
            bytecode: output.bytecode,
            warnings: output.diagnostics,
        })
    } else {
        let mut diagnostics = output.diagnostics;
        if diagnostics.is_empty() {
            diagnostics.push(Diagnostic::error(format!(
                "compiler produced no bytecode for `{}`",
                request.label
            )));
        }
        Err(diagnostics)
    }
}

/// Lifecycle of a compilable unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CompileState {
    Clean,
    #[default]
    Dirty,
    Compiling,
    Error(Vec<Diagnostic>),
}

impl CompileState {
    pub fn mark_dirty(&mut self) {
        *self = CompileState::Dirty;
    }

    /// Only `Dirty` units are recompiled. A unit in `Error` waits for an edit.
    pub fn needs_compile(&self) -> bool {
        matches!(self, CompileState::Dirty)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CompileState::Error(_))
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileState::Error(diagnostics) => diagnostics,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(CompileOutput);

    impl CompilationService for Fixed {
        fn compile(&mut self, _request: &CompileRequest<'_>) -> CompileOutput {
            self.0.clone()
        }
    }

    fn request() -> CompileRequest<'static> {
        CompileRequest {
            label: "unit",
            source: "fn main() {}",
            entry_point: "main",
            target: ShaderTarget::Fragment,
            mode: CompileMode::Live,
        }
    }

    #[test]
    fn success_keeps_warnings() {
        let mut service = Fixed(CompileOutput {
            bytecode: vec![1, 2, 3],
            diagnostics: vec![Diagnostic::new(Severity::Warning, "unused")],
            success: true,
        });
        let compiled = compile_unit(&mut service, &request()).unwrap();
        assert_eq!(compiled.byte_size(), 3);
        assert_eq!(compiled.warnings.len(), 1);
        assert_eq!(compiled.target, ShaderTarget::Fragment);
    }

    #[test]
    fn empty_bytecode_is_a_failure_with_a_diagnostic() {
        let mut service = Fixed(CompileOutput {
            bytecode: Vec::new(),
            diagnostics: Vec::new(),
            success: true,
        });
        let diagnostics = compile_unit(&mut service, &request()).unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("unit"));
    }

    #[test]
    fn state_transitions() {
        let mut state = CompileState::default();
        assert!(state.needs_compile());

        state = CompileState::Error(vec![Diagnostic::error("bad").at_line(3)]);
        assert!(!state.needs_compile());
        assert!(state.is_error());
        assert_eq!(state.diagnostics()[0].to_string(), "error (line 3): bad");

        state.mark_dirty();
        assert!(state.needs_compile());
        assert!(state.diagnostics().is_empty());
    }
}
