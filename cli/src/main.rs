use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use colored::*;
use log::{error, info, LevelFilter};
use regex::Regex;
use std::io::Write;
use std::process;
use std::time::Duration;

use dualprobe_core::{
    normalize_target, ConsoleSink, FindingCollector, HtmlSurface, HttpClient, IdorPlan, Identity,
    InjectionPlan, LoginCheck, LoginPage, PayloadCatalog, ProbeConfig, ProbeEngine, ProbeError,
    RunSummary, SinkRef,
};

#[derive(Parser, Debug)]
#[command(
    name = "dualprobe",
    version,
    about = "Authenticated web probing: cross-identity access checks and login form injection",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  IDOR check:       dualprobe idor -u http://app.test/ -l http://app.test/login -o http://app.test/logout \\
                      -a alice -p alice-pw -b bob -q bob-pw -t \"Alice's Profile\"
  Injection:        dualprobe inject -u shop.test
  Injection, login: dualprobe inject -u shop.test --login-url http://shop.test/login --username u --password p
  Dry-run:          dualprobe inject -u shop.test --dry-run"
)]
struct Cli {
    #[command(subcommand)]
    command: Mode,

    #[arg(long, global = true, default_value = "dualprobe.log", help = "Log file (appended)")]
    log_file: String,

    #[arg(long, global = true, help = "Append findings as JSON lines to this file")]
    output: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Debug-level logging")]
    verbose: bool,

    #[arg(long, global = true, help = "Print the resolved configuration and exit")]
    dry_run: bool,

    #[arg(long, global = true, help = "Stop the run after this many seconds")]
    deadline: Option<u64>,

    #[arg(long, global = true, help = "Proxy URL (e.g. http://127.0.0.1:8080)")]
    proxy: Option<String>,

    #[arg(long, global = true, default_value_t = 10, help = "Page load timeout in seconds")]
    timeout: u64,

    #[arg(long, global = true, default_value_t = 200, help = "Maximum pages to crawl")]
    max_pages: usize,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Crawl as identity A, replay its pages as identity B
    Idor(IdorArgs),
    /// Inject payloads into login forms found on the target
    Inject(InjectArgs),
}

#[derive(Args, Debug)]
struct IdorArgs {
    #[arg(short = 'u', long = "url", help = "Start URL")]
    url: String,

    #[arg(short = 'l', long = "login-url")]
    login_url: String,

    #[arg(short = 'o', long = "logout-url")]
    logout_url: String,

    #[arg(short = 'a', long = "user-a", help = "Identity A username")]
    user_a: String,

    #[arg(short = 'p', long = "pass-a", help = "Identity A password")]
    pass_a: String,

    #[arg(short = 'b', long = "user-b", help = "Identity B username")]
    user_b: String,

    #[arg(short = 'q', long = "pass-b", help = "Identity B password")]
    pass_b: String,

    #[command(flatten)]
    fields: FieldArgs,

    #[arg(short = 'm', long, default_value_t = 3)]
    max_depth: u32,

    #[arg(short = 't', long, help = "Regex marking identity A's data")]
    pattern: String,

    #[command(flatten)]
    check: CheckArgs,
}

#[derive(Args, Debug)]
struct InjectArgs {
    #[arg(short = 'u', long = "url", help = "Target URL (http:// added when missing)")]
    url: String,

    #[arg(short = 'm', long, default_value_t = 3)]
    max_depth: u32,

    #[arg(long, requires_all = ["username", "password"], help = "Log in here before crawling")]
    login_url: Option<String>,

    #[arg(long, requires = "login_url")]
    username: Option<String>,

    #[arg(long, requires = "login_url")]
    password: Option<String>,

    #[arg(long)]
    logout_url: Option<String>,

    #[command(flatten)]
    fields: FieldArgs,

    #[command(flatten)]
    check: CheckArgs,

    #[arg(long, help = "Extra payloads, one per line, optional category: prefix")]
    payloads: Option<String>,

    #[arg(long, default_value_t = 5.0, help = "Seconds at which a time-based payload counts as a hit")]
    time_threshold: f64,

    #[arg(long, default_value_t = 1000, help = "Pause between attempts in milliseconds")]
    delay_ms: u64,
}

#[derive(Args, Debug)]
struct FieldArgs {
    #[arg(short = 'f', long, default_value = "username", help = "Username field name")]
    user_field: String,

    #[arg(short = 'w', long, default_value = "password", help = "Password field name")]
    pass_field: String,

    #[arg(short = 's', long, default_value = "submit", help = "Submit control name")]
    submit_field: String,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[arg(long, help = "Regex the page must match after a successful login")]
    success_marker: Option<String>,

    #[arg(long, conflicts_with = "success_marker", help = "Do not verify logins")]
    assume_login: bool,
}

impl CheckArgs {
    fn login_check(&self) -> anyhow::Result<LoginCheck> {
        if self.assume_login {
            return Ok(LoginCheck::Assume);
        }
        match self.success_marker {
            Some(ref m) => Ok(LoginCheck::Marker(
                Regex::new(m).with_context(|| format!("invalid success marker '{}'", m))?,
            )),
            None => Ok(LoginCheck::FormGone),
        }
    }
}

impl FieldArgs {
    fn login_page(&self, url: &str, check: LoginCheck) -> LoginPage {
        LoginPage::new(url)
            .fields(&self.user_field, &self.pass_field, &self.submit_field)
            .check(check)
    }
}

/// Flushes the file logger when the run ends, however it ends.
struct LogGuard;

impl Drop for LogGuard {
    fn drop(&mut self) {
        log::logger().flush();
    }
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprint!("{}\r\n", format!("[!] {:#}", e).red());
            1
        }
    };
    log::logger().flush();
    process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = build_config(&cli);

    if cli.dry_run {
        print_dry_run(&cli, &config)?;
        return Ok(0);
    }

    let _guard = init_logging(&config.log_file, cli.verbose)?;
    print_banner();

    let sink = ConsoleSink::new_ref();
    let catalog = match config.payloads {
        Some(ref path) => PayloadCatalog::with_file(path)?,
        None => PayloadCatalog::builtin(),
    }
    .into_shared();
    let collector = match config.output {
        Some(ref path) => FindingCollector::with_output(sink.clone(), path)
            .with_context(|| format!("cannot open output file {}", path))?,
        None => FindingCollector::new(sink.clone()),
    };

    let budget = config.budget();
    let canceller = budget.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let client = HttpClient::new(cli.timeout, config.proxy_ref())?;
    info!("HTTP client ready (User-Agent: {})", client.user_agent());
    let surface = HtmlSurface::new(client, Duration::from_secs(cli.timeout));
    let mut engine = ProbeEngine::new(surface, config.clone(), catalog, collector, sink.clone(), budget);

    print_config(&cli, &config);
    let outcome = match cli.command {
        Mode::Idor(ref args) => {
            let plan = idor_plan(args)?;
            engine.run_idor(&plan).await
        }
        Mode::Inject(ref args) => {
            let plan = injection_plan(args)?;
            engine.run_injection(&plan).await
        }
    };

    match outcome {
        Ok(summary) => {
            print_summary(&summary, &sink);
            FindingCollector::report_summary(engine.findings(), &sink);
            info!("Run finished: {} finding(s)", summary.findings);
            Ok(0)
        }
        Err(e) => {
            error!("Run aborted: {}", e);
            let hint = match e {
                ProbeError::Auth { .. } => "Failed initial login",
                _ => "Fatal error",
            };
            sink.on_log("error", &format!("[!] {}: {}", hint, e));
            Ok(1)
        }
    }
}

fn build_config(cli: &Cli) -> ProbeConfig {
    let mut config = ProbeConfig {
        deadline_secs: cli.deadline,
        output: cli.output.clone(),
        log_file: cli.log_file.clone(),
        proxy: cli.proxy.clone(),
        verbose: cli.verbose,
        wait_timeout_secs: cli.timeout,
        max_pages: cli.max_pages,
        ..ProbeConfig::default()
    };
    match cli.command {
        Mode::Idor(ref args) => config.max_depth = args.max_depth,
        Mode::Inject(ref args) => {
            config.max_depth = args.max_depth;
            config.payloads = args.payloads.clone();
            config.time_threshold_secs = args.time_threshold;
            config.attempt_delay_ms = args.delay_ms;
        }
    }
    config
}

fn idor_plan(args: &IdorArgs) -> anyhow::Result<IdorPlan> {
    let pattern = Regex::new(&args.pattern)
        .with_context(|| format!("invalid identity pattern '{}'", args.pattern))?;
    Ok(IdorPlan {
        start_url: normalize_target(&args.url)?,
        login: args
            .fields
            .login_page(normalize_target(&args.login_url)?.as_str(), args.check.login_check()?),
        logout_url: Some(normalize_target(&args.logout_url)?.to_string()),
        owner: Identity::from_login(&args.user_a, &args.pass_a),
        other: Identity::from_login(&args.user_b, &args.pass_b),
        pattern,
    })
}

fn injection_plan(args: &InjectArgs) -> anyhow::Result<InjectionPlan> {
    let login = match (&args.login_url, &args.username, &args.password) {
        (Some(url), Some(user), Some(pass)) => Some((
            Identity::from_login(user, pass),
            args.fields
                .login_page(normalize_target(url)?.as_str(), args.check.login_check()?),
        )),
        (None, None, None) => None,
        _ => bail!("--login-url, --username and --password must be given together"),
    };
    let logout_url = match args.logout_url {
        Some(ref u) => Some(normalize_target(u)?.to_string()),
        None => None,
    };
    Ok(InjectionPlan {
        target: normalize_target(&args.url)?,
        login,
        logout_url,
    })
}

fn init_logging(path: &str, verbose: bool) -> anyhow::Result<LogGuard> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path))?;
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    env_logger::Builder::new()
        .filter_level(LevelFilter::Warn)
        .filter_module("dualprobe_core", level)
        .filter_module("dualprobe", level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, false),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()
        .context("logger already initialised")?;
    Ok(LogGuard)
}

fn print_dry_run(cli: &Cli, config: &ProbeConfig) -> anyhow::Result<()> {
    let (mode, target) = match cli.command {
        Mode::Idor(ref args) => ("idor", normalize_target(&args.url)?),
        Mode::Inject(ref args) => ("inject", normalize_target(&args.url)?),
    };
    println!("[DRY RUN] Would probe target: {} (mode: {})", target, mode);
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn print_banner() {
    let banner = r#"
     _             _                 _
  __| |_   _  __ _| |_ __  _ __ ___ | |__   ___
 / _` | | | |/ _` | | '_ \| '__/ _ \| '_ \ / _ \
| (_| | |_| | (_| | | |_) | | | (_) | |_) |  __/
 \__,_|\__,_|\__,_|_| .__/|_|  \___/|_.__/ \___|
                    |_|
    "#;
    print!("{}\r\n", banner.bright_cyan().bold());
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

fn print_config(cli: &Cli, config: &ProbeConfig) {
    match cli.command {
        Mode::Idor(ref args) => {
            print!("{}\r\n", format!("[+] Mode:       IDOR ({} -> {})", args.user_a, args.user_b).magenta().bold());
            print!("{}\r\n", format!("[+] Target:     {}", args.url).green().bold());
            print!("{}\r\n", format!("[+] Pattern:    {}", args.pattern).blue());
        }
        Mode::Inject(ref args) => {
            print!("{}\r\n", "[+] Mode:       Injection".magenta().bold());
            print!("{}\r\n", format!("[+] Target:     {}", args.url).green().bold());
            if let Some(ref user) = args.username {
                print!("{}\r\n", format!("[+] Login as:   {}", user).blue());
            }
        }
    }
    print!("{}\r\n", format!("[+] Max depth:  {}", config.max_depth).blue());
    print!("{}\r\n", format!("[+] Log file:   {}", config.log_file).blue());
    if let Some(ref out) = config.output {
        print!("{}\r\n", format!("[+] Output:     {}", out).blue());
    }
    if let Some(ref proxy) = config.proxy {
        print!("{}\r\n", format!("[+] Proxy:      {}", proxy).yellow());
    }
    if let Some(secs) = config.deadline_secs {
        print!("{}\r\n", format!("[+] Deadline:   {}s", secs).yellow());
    }
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

fn print_summary(summary: &RunSummary, sink: &SinkRef) {
    sink.on_log(
        "phase",
        &format!(
            "\n[*] Done: {} page(s), {} endpoint(s), {} form(s), {} attempt(s)",
            summary.pages_visited, summary.endpoints, summary.forms, summary.attempts
        ),
    );
    if let Some(reason) = summary.stopped {
        sink.on_log("warn", &format!("[!] Run stopped early: {:?}", reason));
    }
}
