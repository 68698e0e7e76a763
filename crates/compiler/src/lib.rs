//! Seron compiler library
//!
//! Compiles `.sn` source to x86-64 NASM assembly and drives the external
//! assembler and linker to produce object files and executables.
//!
//! The pipeline: lex (on demand) -> parse into an arena AST -> desugar
//! surface forms -> build scopes and frame layout -> type check ->
//! generate assembly. [`compile_to_asm`] runs source text through that
//! pipeline and returns the assembly artifact; [`compile_file`] wraps it
//! with file handling and tool invocation.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod desugar;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod symboltable;
pub mod typechecker;
pub mod types;

pub use ast::Ast;
pub use config::{BuildConfig, CompilerOptions, Filenames, Target};
pub use diagnostics::{Colors, Diagnostic};
pub use symboltable::SymbolTable;

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;

fn info(options: &CompilerOptions, message: &str) {
    if options.verbose {
        diagnostics::info(message);
    }
}

fn render(diag: &Diagnostic, source: &str, path: &Path) -> String {
    diag.render(source, path, &Colors::stderr())
}

/// Compile source text to the assembly artifact. Errors come back as
/// rendered diagnostics ready for stderr.
pub fn compile_to_asm(
    source: &str,
    path: &Path,
    options: &CompilerOptions,
) -> Result<String, String> {
    if options.dump_tokens {
        let tokens = lexer::collect_tokens(source).map_err(|d| render(&d, source, path))?;
        lexer::dump_tokens(&tokens);
    }

    info(options, "Parsing");
    let mut ast = Ast::new();
    let root = parser::parse(source, &mut ast).map_err(|diags| {
        let count = diags.len();
        let rendered: Vec<String> = diags.iter().map(|d| render(d, source, path)).collect();
        format!(
            "{}\nParsing failed with {} error{}",
            rendered.join("\n"),
            count,
            if count == 1 { "" } else { "s" }
        )
    })?;

    if options.dump_ast {
        ast.dump(root, 2);
    }

    desugar::desugar(&mut ast, root);

    info(options, "Constructing symboltable");
    let table = symboltable::build(&mut ast, root).map_err(|d| render(&d, source, path))?;

    if options.dump_symboltable {
        table.dump();
    }

    info(options, "Typechecking");
    typechecker::check(&ast, root, &table).map_err(|d| render(&d, source, path))?;

    info(options, "Code generation");
    codegen::generate(&ast, root, &table, options.asmdoc).map_err(|e| e.to_string())
}

/// Compile a `.sn` file per the configured target: write the assembly,
/// then assemble and link unless `-S`/`-c` stop the pipeline early.
pub fn compile_file(
    input: &Path,
    options: &CompilerOptions,
    build: &BuildConfig,
) -> Result<(), String> {
    let filenames = Filenames::derive(input)?;

    info(options, "Starting compilation");
    let source = fs::read_to_string(input).map_err(|e| match e.kind() {
        ErrorKind::NotFound => format!("Source file `{}` does not exist", input.display()),
        _ => format!("Failed to read `{}`: {}", input.display(), e),
    })?;

    let asm = compile_to_asm(&source, input, options)?;

    fs::write(&filenames.asm, asm)
        .map_err(|e| format!("Failed to write `{}`: {}", filenames.asm.display(), e))?;

    if options.target == Target::Assembly {
        return Ok(());
    }

    info(
        options,
        &format!("Assembling {} via {}", filenames.asm.display(), build.assembler),
    );
    assemble(build, &filenames)?;

    if options.target == Target::Object {
        return Ok(());
    }

    info(
        options,
        &format!("Linking {} via {}", filenames.obj.display(), build.linker),
    );
    link(build, &filenames)?;

    info(
        options,
        &format!("Binary `{}` has been built", filenames.stripped.display()),
    );

    Ok(())
}

/// Run a toolchain command to completion, mapping a missing executable to
/// a "not found" diagnostic and a nonzero exit to its captured stderr.
fn run_tool(program: &str, args: &[&str]) -> Result<(), String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => format!("`{}` not found in $PATH", program),
            _ => format!("Failed to run `{}`: {}", program, e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("`{}` failed:\n{}", program, stderr));
    }

    Ok(())
}

fn assemble(build: &BuildConfig, filenames: &Filenames) -> Result<(), String> {
    let asm = filenames.asm.display().to_string();
    let obj = filenames.obj.display().to_string();

    run_tool(
        &build.assembler,
        &[asm.as_str(), "-felf64", "-o", &obj, "-gdwarf"],
    )
    .inspect_err(|_| {
        // Leave no partial object behind.
        fs::remove_file(&filenames.obj).ok();
    })
}

fn link(build: &BuildConfig, filenames: &Filenames) -> Result<(), String> {
    let obj = filenames.obj.display().to_string();
    let bin = filenames.stripped.display().to_string();

    let mut args = vec!["-no-pie".to_string()];
    for lib in &build.libraries {
        args.push(format!("-l{}", lib));
    }
    args.push(obj);
    args.push("-o".to_string());
    args.push(bin);

    let args: Vec<&str> = args.iter().map(|a| a.as_str()).collect();
    run_tool(&build.linker, &args).inspect_err(|_| {
        fs::remove_file(&filenames.stripped).ok();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn options() -> CompilerOptions {
        CompilerOptions::default()
    }

    fn asm_of(source: &str) -> String {
        compile_to_asm(source, &PathBuf::from("test.sn"), &options()).unwrap()
    }

    #[test]
    fn test_compile_to_asm_end_to_end() {
        let asm = asm_of("proc main() int { return 1 + 2; }");
        assert!(asm.starts_with("section .data\n"));
        assert!(asm.contains("section .text"));
        assert!(asm.contains("global main"));
        assert!(asm.contains("add eax, edi"));
    }

    #[test]
    fn test_parse_errors_summarized() {
        let err =
            compile_to_asm("proc f() { let ; !; }", &PathBuf::from("test.sn"), &options())
                .unwrap_err();
        assert!(err.contains("Parsing failed with 2 errors"));
    }

    #[test]
    fn test_duplicate_declaration_stops_before_codegen() {
        let err = compile_to_asm(
            "proc f() { { let x: int = 1; let x: int = 2; } }",
            &PathBuf::from("test.sn"),
            &options(),
        )
        .unwrap_err();
        assert!(err.contains("`x` already exists"));
    }

    #[test]
    fn test_type_error_is_rendered_with_location() {
        let err = compile_to_asm(
            "proc g(a: int) int;\nproc f(a: int) int { return g(a, a); }",
            &PathBuf::from("test.sn"),
            &options(),
        )
        .unwrap_err();
        assert!(err.contains("Expected 1 arguments, got 2"));
        assert!(err.contains("test.sn:2"));
    }

    #[test]
    fn test_compile_file_rejects_wrong_extension() {
        let err = compile_file(
            &PathBuf::from("program.c"),
            &options(),
            &BuildConfig::default(),
        )
        .unwrap_err();
        assert!(err.contains("must be `.sn`"));
    }

    #[test]
    fn test_compile_file_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("nope.sn");
        let err = compile_file(&input, &options(), &BuildConfig::default()).unwrap_err();
        assert!(err.contains("does not exist"));
    }

    #[test]
    fn test_compile_file_writes_assembly_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("answer.sn");
        std::fs::write(&input, "proc main() int { return 42; }").unwrap();

        let opts = CompilerOptions {
            target: Target::Assembly,
            ..Default::default()
        };
        compile_file(&input, &opts, &BuildConfig::default()).unwrap();

        let asm = std::fs::read_to_string(dir.path().join("answer.s")).unwrap();
        assert!(asm.contains("global main"));
        assert!(asm.contains("mov eax, 42"));
        // -S stops before the assembler runs
        assert!(!dir.path().join("answer.o").exists());
    }

    #[test]
    fn test_failed_compile_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.sn");
        std::fs::write(&input, "proc main() int { return x; }").unwrap();

        let opts = CompilerOptions {
            target: Target::Assembly,
            ..Default::default()
        };
        compile_file(&input, &opts, &BuildConfig::default()).unwrap_err();
        assert!(!dir.path().join("broken.s").exists());
    }
}
