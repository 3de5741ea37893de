//zfind/src/main.rs
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use zfind::kernel::services::adapters::{load_settings, FindRuntime};
use zfind::kernel::services::ports::{RunState, Settings};
use zfind::{
    Document, FindService, MatchSpan, ReplaceMode, SearchConfig, SearchHandle, SearchScope,
    SearchTargets,
};

mod logging;

const USAGE: &str = "usage: zfind [-e] [-i] [-w] [-s] [--hidden] [--follow] [--no-ignore] \
[-g GLOB] [-r REPLACEMENT] PATTERN [PATH]";

struct Args {
    config: SearchConfig,
    path: PathBuf,
    replace: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut config = SearchConfig::default();
    let mut replace = false;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-e" | "--regex" => config.regular_expression = true,
            "-i" | "--ignore-case" => config.ignore_case = true,
            "-w" | "--words" => config.full_words = true,
            "-s" | "--ignore-whitespace" => config.ignore_whitespace = true,
            "--hidden" => config.search_hidden_folders = true,
            "--follow" => config.follow_links = true,
            "--no-ignore" => config.respect_ignore_files = false,
            "-g" | "--glob" => {
                config.glob_pattern = args.next().ok_or("--glob needs a value")?;
            }
            "-r" | "--replace" => {
                config.replace_string = args.next().ok_or("--replace needs a value")?;
                replace = true;
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ if arg.starts_with('-') && arg.len() > 1 => {
                return Err(format!("unknown option {}\n{}", arg, USAGE));
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    config.find_string = positional.next().ok_or(USAGE)?;
    let path = positional.next().map_or_else(|| PathBuf::from("."), PathBuf::from);
    if positional.next().is_some() {
        return Err(USAGE.to_string());
    }
    Ok(Args {
        config,
        path,
        replace,
    })
}

fn main() -> ExitCode {
    let _logging = logging::init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(message) => {
            eprintln!("zfind: {}", message);
            ExitCode::from(2)
        }
    }
}

fn run(mut args: Args) -> Result<bool, String> {
    let settings = load_settings().unwrap_or_else(Settings::default);
    let runtime = FindRuntime::new().map_err(|e| e.to_string())?;
    let service = FindService::with_settings(runtime.tokio_handle(), settings.find);

    let targets = if args.path.is_file() {
        let document = Document::open(&args.path)
            .map_err(|e| format!("{}: {}", args.path.display(), e))?;
        args.config.scope = SearchScope::Document;
        SearchTargets::document(document.into_handle())
    } else {
        args.config.scope = SearchScope::Folder;
        SearchTargets::folder(&args.path)
    };

    let handle = service
        .start_search(args.config, targets)
        .map_err(|e| e.to_string())?;
    while !handle.wait_idle(Duration::from_millis(200)) {}

    let results = handle.current_results();
    for span in results.iter_spans() {
        print_match(&handle, span);
    }
    for (source, error) in results.failures() {
        eprintln!("{}: {}", source, error);
    }

    let status = handle.current_status();
    if status.state == RunState::Failed {
        return Err(status.message);
    }

    if args.replace && status.match_count > 0 {
        let updated = handle
            .replace_all(ReplaceMode::ReplaceOnly)
            .map_err(|e| e.to_string())?;
        // 单文件模式下文档只在内存中修改，需要写回磁盘
        if let Some(document) = handle_document(&handle, &args.path) {
            let doc = document
                .read()
                .map_err(|_| "document lock poisoned".to_string())?;
            doc.save(&args.path).map_err(|e| e.to_string())?;
        }
        let total: usize = updated.iter().map(|u| u.replacements).sum();
        eprintln!("replaced {} matches in {} sources", total, updated.len());
    } else {
        eprintln!("{}", status.message);
    }

    Ok(status.match_count > 0)
}

fn handle_document(
    handle: &SearchHandle,
    path: &std::path::Path,
) -> Option<zfind::DocumentHandle> {
    if handle.config().scope != SearchScope::Document || !path.is_file() {
        return None;
    }
    handle.document_handles().next()
}

fn print_match(handle: &SearchHandle, span: &MatchSpan) {
    match handle.preview(span, 80) {
        Ok(preview) => println!(
            "{}:{}:{}: {}",
            span.source,
            preview.line + 1,
            preview.column + 1,
            preview.line_text()
        ),
        Err(_) => println!("{}:{}", span.source, span.start),
    }
}
