use tarn_core::vm::error::ExitCode;
use tarn_core::vm::Vm;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut script_file: Option<String> = None;
    let mut show_disasm = false;
    let mut show_version = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--disasm" => show_disasm = true,
            "-v" | "--version" => show_version = true,
            "-h" | "--help" => {
                print_usage();
                return;
            }
            arg if arg.starts_with('-') => {
                eprintln!("tarn: unrecognized option '{arg}'");
                print_usage();
                std::process::exit(64);
            }
            arg => {
                if script_file.is_some() {
                    eprintln!("tarn: only one script file may be given");
                    std::process::exit(64);
                }
                script_file = Some(arg.to_string());
            }
        }
        i += 1;
    }

    if show_version {
        println!("tarn {}", env!("CARGO_PKG_VERSION"));
        if script_file.is_none() {
            return;
        }
    }

    let mut vm = Vm::new();
    tarn_stdlib::register_all(&mut vm);

    match script_file {
        Some(path) => run_file(&mut vm, &path, show_disasm),
        None => repl(vm),
    }
}

fn print_usage() {
    eprintln!("usage: tarn [--disasm] [script.tn]");
    eprintln!("With no script, tarn starts an interactive session.");
}

/// Compile and run a source file, printing the top-level return value.
fn run_file(vm: &mut Vm, path: &str, show_disasm: bool) {
    let source = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("tarn: cannot open {path}: {e}");
            std::process::exit(66);
        }
    };

    let codeblock = match tarn_compiler::compile(vm, &source, path) {
        Ok(cb) => cb,
        Err(e) => {
            eprintln!("tarn: {path}: {e}");
            std::process::exit(ExitCode::CompileError.code());
        }
    };

    if show_disasm {
        print!("{}", tarn_compiler::disasm::disassemble(vm, codeblock));
    }

    let exit = vm.execute(codeblock);
    if exit == ExitCode::Success {
        println!("{}", vm.format_value(vm.return_value));
    }
    std::process::exit(exit.code());
}

/// Interactive session: each line is tried as an expression first
/// (wrapped in `return ...;`), then as statements.
fn repl(mut vm: Vm) {
    println!("tarn {} interactive session", env!("CARGO_PKG_VERSION"));

    let mut rl = match rustyline::DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("tarn: cannot initialize line editor: {e}");
            return;
        }
    };

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                let as_expr = format!("return {line};");
                match eval(&mut vm, &as_expr) {
                    Ok(Some(output)) => println!("{output}"),
                    Ok(None) => {}
                    Err(_) => match eval(&mut vm, line) {
                        Ok(Some(output)) => println!("{output}"),
                        Ok(None) => {}
                        Err(message) => eprintln!("{message}"),
                    },
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => continue,
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("tarn: readline error: {e}");
                break;
            }
        }
    }
}

/// Evaluate one REPL input. Returns the rendered result (None when the
/// result is nil) or the error message.
fn eval(vm: &mut Vm, source: &str) -> Result<Option<String>, String> {
    let codeblock =
        tarn_compiler::compile(vm, source, "=stdin").map_err(|e| format!("{e}"))?;
    match vm.run_block(codeblock) {
        Ok(val) => {
            if val.is_nil() {
                Ok(None)
            } else {
                Ok(Some(vm.format_value(val)))
            }
        }
        Err(e) => {
            let trace = vm.format_trace(&e);
            vm.reset();
            Err(trace)
        }
    }
}
