//! Vela Compiler CLI
//!
//! The `velac` command is the front-end driver: it loads sources,
//! runs the lexer and parser, and reports diagnostics. `build` prints
//! the front end's intermediate artifacts on request; the semantic
//! checker and body lowerer are external collaborators, so the IR it
//! emits is the declaration surface they fill in.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vela::ast::{AccessModifier, Decl, DeclKind, Sign, SignKind, SourceUnit};
use vela::diag::{self, Level};
use vela::ir::{self, FunctionId, Linkage, LoweredType, Module};
use vela::lexer::Lexer;
use vela::parser;
use vela::sema::{DeclRef, GenericParamId, ModelType, Program};
use vela::source::SourceMap;

#[derive(Parser)]
#[command(name = "velac")]
#[command(version = vela::VERSION)]
#[command(about = "The Vela compiler front end", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tokenize a file and print its tokens
    Tokenize {
        /// Input file
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Parse a file and print its AST
    Parse {
        /// Input file
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Check a file for syntax errors
    Check {
        /// Input file
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Run the front end and print the requested artifacts
    Build {
        /// Input file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Print the token stream
        #[arg(long)]
        emit_tokens: bool,

        /// Print the AST
        #[arg(long)]
        emit_ast: bool,

        /// Print the IR function surface after depolymorphization
        #[arg(long)]
        emit_ir: bool,
    },
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Tokenize { input } => {
            let mut sources = SourceMap::new();
            let id = sources
                .load(&input)
                .map_err(|e| miette::miette!("{}", e))?;
            let file = sources.get(id);
            for token in Lexer::new(file) {
                println!(
                    "{:?} @ {} = {:?}",
                    token.kind,
                    token.span,
                    token.text(&file.text)
                );
            }
            Ok(())
        }

        Commands::Parse { input } => {
            let mut sources = SourceMap::new();
            let id = sources
                .load(&input)
                .map_err(|e| miette::miette!("{}", e))?;
            let (unit, diags) = parser::parse(sources.get(id));
            for d in &diags {
                eprint!("{}", diag::render(&sources, d));
            }
            println!("{:#?}", unit.decls);
            if unit.has_error {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Check { input } => {
            let mut sources = SourceMap::new();
            let id = sources
                .load(&input)
                .map_err(|e| miette::miette!("{}", e))?;
            let (unit, diags) = parser::parse(sources.get(id));
            for d in &diags {
                eprint!("{}", diag::render(&sources, d));
            }
            let errors = diags.iter().filter(|d| d.level == Level::Error).count();
            let warnings = diags.iter().filter(|d| d.level == Level::Warning).count();
            if unit.has_error {
                eprintln!("{} error(s), {} warning(s)", errors, warnings);
                std::process::exit(1);
            }
            println!(
                "{}: ok ({} declaration(s), {} warning(s))",
                input.display(),
                unit.decls.len(),
                warnings
            );
            Ok(())
        }

        Commands::Build {
            input,
            emit_tokens,
            emit_ast,
            emit_ir,
        } => {
            let mut sources = SourceMap::new();
            let id = sources
                .load(&input)
                .map_err(|e| miette::miette!("{}", e))?;
            let file = sources.get(id);

            if emit_tokens {
                println!("=== tokens ===");
                for token in Lexer::new(file) {
                    println!(
                        "{:?} @ {} = {:?}",
                        token.kind,
                        token.span,
                        token.text(&file.text)
                    );
                }
            }

            let (unit, diags) = parser::parse(file);
            for d in &diags {
                eprint!("{}", diag::render(&sources, d));
            }

            if emit_ast {
                println!("=== ast ===");
                println!("{:#?}", unit.decls);
            }

            if emit_ir {
                let name = input
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("unit");
                let mut module = declare_shells(name, &unit);
                ir::depolymorphize(&mut module, &Program::new());
                println!("=== ir ===");
                print!("{}", module);
                for fid in module.ids() {
                    if let Some(wrapper) = module.existentialized_entry(fid) {
                        println!("// existentialized entry: {} via {}", fid, wrapper);
                    }
                }
            }

            if unit.has_error {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Declare an IR shell for everything the unit lowers to a function:
/// function declarations (view requirements stay bodiless),
/// constructors, and the accessor/initializer pair of top-level
/// bindings. Bodies arrive with the external lowerer; until then each
/// shell holds an `unreachable` placeholder so the module prints.
fn declare_shells(name: &str, unit: &SourceUnit) -> Module {
    let mut module = Module::new(name);
    let mut next = 0u32;
    declare_decl_shells(&mut module, &mut next, None, &unit.decls);
    module
}

fn declare_decl_shells(
    module: &mut Module,
    next: &mut u32,
    owner: Option<&str>,
    decls: &[Decl],
) {
    for decl in decls {
        match &decl.kind {
            DeclKind::Function(f) => {
                let name = match owner {
                    Some(owner) => format!("{}.{}", owner, f.name.name),
                    None => f.name.name.clone(),
                };
                let linkage = match f.modifiers.access {
                    Some((AccessModifier::Public, _)) => Linkage::External,
                    _ => Linkage::Module,
                };
                let generic_parameters: Vec<GenericParamId> = f
                    .generics
                    .iter()
                    .flat_map(|g| &g.params)
                    .map(|_| {
                        let param = GenericParamId(*next);
                        *next += 1;
                        param
                    })
                    .collect();
                let decl_ref = DeclRef::new(*next, &name);
                *next += 1;
                let mut shell = ir::Function::new(
                    &name,
                    decl.span,
                    linkage,
                    Vec::new(),
                    LoweredType::object(ModelType::void()),
                    generic_parameters,
                );
                if f.body.is_some() {
                    let entry = shell.append_block(Vec::new());
                    shell.block_mut(entry).append(ir::Instruction::Unreachable);
                }
                module.declare(FunctionId::Lowered(decl_ref), shell);
            }
            DeclKind::Constructor(_) => {
                let name = owner.unwrap_or("new").to_string();
                let decl_ref = DeclRef::new(*next, &name);
                *next += 1;
                let mut shell = ir::Function::new(
                    &name,
                    decl.span,
                    Linkage::Module,
                    Vec::new(),
                    LoweredType::object(ModelType::void()),
                    Vec::new(),
                );
                let entry = shell.append_block(Vec::new());
                shell.block_mut(entry).append(ir::Instruction::Unreachable);
                module.declare(FunctionId::Constructor(decl_ref), shell);
            }
            DeclKind::Binding(b) if owner.is_none() => {
                // A global binding lowers to an accessor and an
                // initializer.
                if let Some(var) = b.pattern.variables().first() {
                    let decl_ref = DeclRef::new(*next, &var.name.name);
                    *next += 1;
                    let forms: [fn(DeclRef) -> FunctionId; 2] =
                        [FunctionId::Accessor, FunctionId::Initializer];
                    for form in forms {
                        let mut shell = ir::Function::new(
                            &var.name.name,
                            decl.span,
                            Linkage::Module,
                            Vec::new(),
                            LoweredType::object(ModelType::void()),
                            Vec::new(),
                        );
                        let entry = shell.append_block(Vec::new());
                        shell.block_mut(entry).append(ir::Instruction::Unreachable);
                        module.declare(form(decl_ref.clone()), shell);
                    }
                }
            }
            DeclKind::Product(p) => {
                declare_decl_shells(module, next, Some(&p.name.name), &p.members);
            }
            DeclKind::View(v) => {
                declare_decl_shells(module, next, Some(&v.name.name), &v.members);
            }
            DeclKind::Extension(e) => {
                let owner = subject_name(&e.subject).unwrap_or("extension");
                declare_decl_shells(module, next, Some(owner), &e.members);
            }
            _ => {}
        }
    }
}

/// The name a signature extends, for qualifying member shells
fn subject_name(sign: &Sign) -> Option<&str> {
    match &sign.kind {
        SignKind::Bare(name) => Some(&name.name),
        SignKind::Specialized { base, .. } => Some(&base.name),
        SignKind::Compound { components } => {
            components.last().map(|c| c.name.name.as_str())
        }
        _ => None,
    }
}
