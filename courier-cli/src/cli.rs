use clap::Parser;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Background HTTP fetcher with a persistent response cache",
    long_about = "Fetches one or more URLs through the courier request queue.\n\
                  \n\
                  Requests run concurrently on a background I/O thread while the\n\
                  main thread pumps progress and completion events. Successful GET\n\
                  responses are stored in a persistent cache and revalidated with\n\
                  ETag/Last-Modified on later runs."
)]
pub struct CliArgs {
    /// URL(s) to fetch
    #[arg(required = true, help = "One or more URLs to fetch")]
    pub urls: Vec<String>,

    /// Output directory for downloaded bodies
    #[arg(
        short,
        long,
        help = "Write each response body to a file in this directory instead of stdout"
    )]
    pub output_dir: Option<PathBuf>,

    /// Extra request header, repeatable
    #[arg(short = 'H', long = "header", help = "Extra request header as \"Name: value\", repeatable")]
    pub headers: Vec<String>,

    /// Maximum concurrent transfers
    #[arg(short = 'j', long, default_value_t = 4, help = "Maximum concurrent transfers")]
    pub parallel: usize,

    /// Disable the response cache
    #[arg(long, help = "Disable the persistent response cache")]
    pub no_cache: bool,

    /// Cache directory
    #[arg(long, help = "Cache location (default: courier-cache under the system temp directory)")]
    pub cache_dir: Option<PathBuf>,

    /// Time to response headers, in seconds
    #[arg(long, default_value_t = 30, help = "Seconds to wait for response headers. 0 disables the bound.")]
    pub timeout: u64,

    /// Proxy server URL
    #[arg(
        long,
        help = "Proxy URL (e.g. http://proxy:8080 or socks5://proxy:1080). Defaults to system proxy settings."
    )]
    pub proxy: Option<String>,

    /// Treat HTTP error statuses as failures
    #[arg(long, help = "Exit non-zero when a server answers with status >= 400")]
    pub fail: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,
}
