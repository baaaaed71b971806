use super::{CompilationService, CompileOutput, CompileRequest, Diagnostic};

/// Stand-in compiler for headless playback and tests.
///
/// A source compiles when it is non-empty and mentions its entry point. The
/// "bytecode" is the source text itself. Sources containing a line starting
/// with `#error` fail with that line's message, which lets projects and tests
/// script compile failures.
#[derive(Debug, Default, Clone)]
pub struct HeadlessCompiler {
    compiles: usize,
    failures: usize,
}

impl HeadlessCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of compile requests served so far.
    pub fn compile_count(&self) -> usize {
        self.compiles
    }

    pub fn failure_count(&self) -> usize {
        self.failures
    }
}

impl CompilationService for HeadlessCompiler {
    fn compile(&mut self, request: &CompileRequest<'_>) -> CompileOutput {
        self.compiles += 1;

        let mut diagnostics = Vec::new();
        if request.source.trim().is_empty() {
            diagnostics.push(Diagnostic::error(format!("`{}` has no source", request.label)));
        }

        for (index, line) in request.source.lines().enumerate() {
            if let Some(message) = line.trim_start().strip_prefix("#error") {
                diagnostics.push(Diagnostic::error(message.trim()).at_line(index as u32 + 1));
            }
        }

        if diagnostics.is_empty() && !request.source.contains(request.entry_point) {
            diagnostics.push(Diagnostic::error(format!(
                "entry point `{}` not found for {}",
                request.entry_point,
                request.target.profile()
            )));
        }

        if !diagnostics.is_empty() {
            self.failures += 1;
            return CompileOutput {
                bytecode: Vec::new(),
                diagnostics,
                success: false,
            };
        }

        CompileOutput {
            bytecode: request.source.as_bytes().to_vec(),
            diagnostics,
            success: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{compile_unit, CompileMode, ShaderTarget};

    fn request<'a>(source: &'a str, entry_point: &'a str) -> CompileRequest<'a> {
        CompileRequest {
            label: "test",
            source,
            entry_point,
            target: ShaderTarget::Compute,
            mode: CompileMode::Build,
        }
    }

    #[test]
    fn compiles_sources_with_entry_point() {
        let mut compiler = HeadlessCompiler::new();
        let compiled = compile_unit(&mut compiler, &request("fn trail() {}", "trail")).unwrap();
        assert_eq!(compiled.bytecode, b"fn trail() {}".to_vec());
        assert_eq!(compiler.compile_count(), 1);
    }

    #[test]
    fn scripted_errors_carry_line_numbers() {
        let mut compiler = HeadlessCompiler::new();
        let source = "fn main() {\n#error missing semicolon\n}";
        let diagnostics = compile_unit(&mut compiler, &request(source, "main")).unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].line, Some(2));
        assert_eq!(diagnostics[0].message, "missing semicolon");
        assert_eq!(compiler.failure_count(), 1);
    }

    #[test]
    fn missing_entry_point_fails() {
        let mut compiler = HeadlessCompiler::new();
        let diagnostics = compile_unit(&mut compiler, &request("fn other() {}", "main")).unwrap_err();
        assert!(diagnostics[0].message.contains("cs_6_0"));
    }
}
