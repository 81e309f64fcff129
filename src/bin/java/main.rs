use std::{
    env,
    error::Error,
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use log::LevelFilter;
use minijvm::{Runtime, RuntimeConfig, RuntimeError, class, logging::SimpleLogger};

const USAGE: &str = "usage: java [--run] [--debug] [--class-path <path>]... <file.class> [args...]";

struct Options {
    run: bool,
    debug: bool,
    class_path: Vec<PathBuf>,
    file: PathBuf,
    args: Vec<String>,
}

fn parse_options() -> Result<Options, String> {
    let mut args = env::args().skip(1);
    let mut run = false;
    let mut debug = false;
    let mut class_path = vec![];
    let file = loop {
        match args.next().as_deref() {
            Some("-r" | "--run") => run = true,
            Some("-d" | "--debug") => debug = true,
            Some("-cp" | "--class-path") => match args.next() {
                Some(path) => class_path.push(PathBuf::from(path)),
                None => return Err("--class-path expects a path".to_string()),
            },
            Some(flag) if flag.starts_with('-') => return Err(format!("unknown flag {flag}")),
            Some(file) => break PathBuf::from(file),
            None => return Err("missing class file".to_string()),
        }
    };
    Ok(Options {
        run,
        debug,
        class_path,
        file,
        args: args.collect(),
    })
}

/// The directory the class path starts at: `file` with one component
/// stripped per package segment of `class_name`.
fn class_root(file: &Path, class_name: &str) -> PathBuf {
    let mut root = file.parent().unwrap_or(Path::new("")).to_path_buf();
    for _ in class_name.matches('/') {
        if !root.pop() {
            break;
        }
    }
    if root.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        root
    }
}

fn execute(options: Options) -> Result<(), Box<dyn Error>> {
    let bytes = fs::read(&options.file)?;
    let class_file = class::class_file(&bytes)?;
    if !options.run {
        print!("{class_file}");
        return Ok(());
    }

    let class_name = class_file.name()?.to_string();
    let mut config = RuntimeConfig::default();
    config.class_path.push(class_root(&options.file, &class_name));
    config.class_path.extend(options.class_path);
    let mut runtime = Runtime::new(config)?;
    match runtime.run_main(&class_name, &options.args) {
        Err(RuntimeError::Uncaught { class_name, .. }) => {
            Err(format!("Exception in thread \"main\" {}", class_name.replace('/', ".")).into())
        }
        result => Ok(result?),
    }
}

fn main() -> ExitCode {
    let options = match parse_options() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}\n{USAGE}");
            return ExitCode::from(2);
        }
    };
    let level = if options.debug {
        LevelFilter::Trace
    } else {
        LevelFilter::Warn
    };
    if let Err(err) = SimpleLogger::init(level) {
        eprintln!("failed to install logger: {err}");
    }

    match execute(options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_root_strips_package() {
        assert_eq!(
            class_root(Path::new("out/com/example/Main.class"), "com/example/Main"),
            PathBuf::from("out")
        );
        assert_eq!(class_root(Path::new("Main.class"), "Main"), PathBuf::from("."));
        assert_eq!(
            class_root(Path::new("a/Main.class"), "deep/pkg/Main"),
            PathBuf::from(".")
        );
    }
}
