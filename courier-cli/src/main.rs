use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use courier_engine::{
    ClientConfigBuilder, CacheConfig, GroupConfig, ProxyConfig, ProxyType, Request, RequestQueue,
    TransferEvent, TransferResult,
};
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;

mod cli;
mod error;

use cli::CliArgs;
use error::AppError;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    // Setup logging. Bodies may go to stdout, so logs go to stderr.
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    let config = build_config(&args)?;
    let queue = RequestQueue::new(
        config,
        vec![GroupConfig::new("fetch").with_max_concurrent(args.parallel.max(1))],
    )?;

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)?;
    }

    let total = args.urls.len();
    let results: Arc<Mutex<Vec<Option<TransferResult>>>> =
        Arc::new(Mutex::new(vec![None; total]));

    for (index, url) in args.urls.iter().enumerate() {
        let mut request = Request::get(url)
            .with_caching(!args.no_cache)
            .with_fail_on_http_error(args.fail)
            .with_connect_timeout(Duration::from_secs(args.timeout));
        for line in &args.headers {
            request = request.with_header(line.clone());
        }
        if let Some(dir) = &args.output_dir {
            request = request.with_download_file(dir.join(file_name_for(url, index)));
        }

        let url = url.clone();
        let results = Arc::clone(&results);
        queue.submit(request, 0, move |event| match event {
            TransferEvent::Connecting => debug!(url = %url, "Connecting"),
            TransferEvent::Progress { fetched, total } => {
                debug!(url = %url, fetched, total, "Progress")
            }
            TransferEvent::Done(result) => {
                if result.success {
                    info!(url = %url, status = result.status, bytes = result.body.len(), "Done");
                } else {
                    error!(url = %url, error = ?result.error, "Failed");
                }
                results.lock().unwrap()[index] = Some(result);
            }
        });
    }

    // Pump completions on this thread until every transfer settled.
    loop {
        queue.pump();
        if results.lock().unwrap().iter().all(|r| r.is_some()) {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let results = results.lock().unwrap();
    let mut failed = 0;
    let mut stdout = std::io::stdout().lock();
    for result in results.iter().flatten() {
        if result.success {
            if args.output_dir.is_none() && !result.body.is_empty() {
                stdout.write_all(&result.body)?;
            }
        } else {
            failed += 1;
        }
    }
    stdout.flush()?;

    if failed > 0 {
        return Err(AppError::TransfersFailed { failed, total });
    }
    Ok(())
}

fn build_config(args: &CliArgs) -> Result<courier_engine::ClientConfig, AppError> {
    let mut builder = ClientConfigBuilder::new()
        .with_caching_enabled(!args.no_cache)
        .with_connect_timeout(Duration::from_secs(args.timeout));

    if let Some(dir) = &args.cache_dir {
        builder = builder.with_cache_config(CacheConfig {
            path: Some(dir.join("cache.sqlite")),
            ..CacheConfig::default()
        });
    }

    if let Some(proxy_url) = &args.proxy {
        if proxy_url.trim().is_empty() {
            return Err(AppError::InvalidInput("empty proxy URL".to_string()));
        }
        let proxy_type = if proxy_url.starts_with("socks5://") {
            ProxyType::Socks5
        } else if proxy_url.starts_with("https://") {
            ProxyType::Https
        } else {
            ProxyType::Http
        };
        builder = builder.with_proxy(ProxyConfig {
            url: proxy_url.clone(),
            proxy_type,
            auth: None,
        });
    }

    Ok(builder.build())
}

/// Pick a file name from the URL path, falling back to the submission index.
fn file_name_for(url: &str, index: usize) -> PathBuf {
    let trimmed = url.trim_end_matches('/');
    let candidate = trimmed
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    if candidate.is_empty() || candidate.contains(':') {
        PathBuf::from(format!("download-{index}"))
    } else {
        PathBuf::from(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::file_name_for;

    #[test]
    fn test_file_name_from_url_path() {
        assert_eq!(
            file_name_for("https://example.com/a/data.json", 0),
            std::path::PathBuf::from("data.json")
        );
        assert_eq!(
            file_name_for("https://example.com/a/data.json?v=2", 0),
            std::path::PathBuf::from("data.json")
        );
    }

    #[test]
    fn test_file_name_falls_back_to_index() {
        assert_eq!(
            file_name_for("https://example.com/", 3),
            std::path::PathBuf::from("download-3")
        );
        assert_eq!(
            file_name_for("https://example.com", 1),
            std::path::PathBuf::from("download-1")
        );
    }
}
