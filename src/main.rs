extern crate gnu2_demangler;

use std::env;
use std::io;
use std::io::BufRead;
use std::process;

use gnu2_demangler::DemangleFlags;

const USAGE: &'static str = "\
Usage: gnu2-demangle [options] [symbol...]

Demangles GNU v2 C++ symbols.  With no symbols, reads one per line from
standard input.  Symbols that do not parse are echoed back unchanged.

Options:
  -e, --error-on-failure  report parse failures on stderr and exit non-zero
  -v, --verbose           dump the parsed AST to stderr
  -h, --help              show this message";

fn main() {
    let mut args: Vec<_> = env::args().collect();
    args.remove(0);

    let mut error_on_failure = false;
    let mut verbose = false;
    let mut symbols = Vec::new();
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("{}", USAGE);
                return;
            }
            "-e" | "--error-on-failure" => error_on_failure = true,
            "-v" | "--verbose" => verbose = true,
            _ => symbols.push(arg),
        }
    }

    let mut any_failed = false;
    let mut print_demangled = |sym: &str| {
        let parsed = match gnu2_demangler::parse(sym) {
            Ok(parsed) => parsed,
            Err(err) => {
                if error_on_failure || err.is_hard() {
                    eprintln!("error: {}", err);
                    any_failed = true;
                } else {
                    println!("{}", sym);
                }
                return;
            }
        };
        if verbose {
            eprintln!("{:#?}", &parsed);
        }
        match gnu2_demangler::serialize(&parsed, DemangleFlags::empty()) {
            Ok(ref demangled) => println!("{}", demangled),
            Err(err) => {
                eprintln!("error: {}", err);
                if error_on_failure || err.is_hard() {
                    any_failed = true;
                } else {
                    println!("{}", sym);
                }
            }
        }
    };

    if symbols.is_empty() {
        let stdin = io::stdin();
        let handle = stdin.lock();

        for line in handle.lines() {
            match line {
                Ok(line) => print_demangled(line.trim_end()),
                _ => continue,
            }
        }
    } else {
        for symbol in symbols {
            print_demangled(&symbol);
        }
    }

    if any_failed {
        process::exit(1);
    }
}
