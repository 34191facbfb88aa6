//!
//! tenancy console shell
//! ---------------------
//! Interactive operator shell over the session and scope core: sign in, browse
//! tenants, pick the active tenant and data contract. Stored credentials and
//! selections are resumed on start when `--state-dir` (or CONSOLE_STATE_DIR) is set.

use std::env;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use tenancy_console::cli::{render_contracts, render_status, render_tenants};
use tenancy_console::scope::TenantQuery;
use tenancy_console::{AppError, ConsoleConfig, ConsoleContext};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--url <base url>] [--state-dir <dir>] [--user <u> --password <p>]\n\nFlags:\n  --url <url>          API base URL (default: CONSOLE_API_URL or http://localhost:8080)\n  --state-dir <dir>    Keep credentials and selections across runs\n  --user <u>           Sign in on start\n  --password <p>       Password for --user\n  -h, --help           Show this help\n\nInteractive commands:\n  login <user> <password>   sign in\n  logout                    sign out and clear the selection\n  whoami                    show the signed-in identity\n  validate                  re-check the session with the server\n  tenants [page] [size]     list tenants (page is 0-based)\n  use tenant <id|none>      select the active tenant\n  use contract <id|none>    select the active data contract\n  contracts                 list data contracts of the selected tenant\n  status                    show session and selection\n  help                      show this help\n  quit | exit               leave the shell"
    );
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);
    let mut config = ConsoleConfig::from_env();
    let mut user: Option<String> = None;
    let mut password: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--url" => {
                if i + 1 >= args.len() { eprintln!("--url requires a value"); print_usage(&program); std::process::exit(2); }
                config.base_url = args[i + 1].clone();
                i += 2;
            }
            "--state-dir" => {
                if i + 1 >= args.len() { eprintln!("--state-dir requires a value"); print_usage(&program); std::process::exit(2); }
                config = config.with_state_dir(&args[i + 1]);
                i += 2;
            }
            "--user" => {
                if i + 1 >= args.len() { eprintln!("--user requires a value"); print_usage(&program); std::process::exit(2); }
                user = Some(args[i + 1].clone());
                i += 2;
            }
            "--password" => {
                if i + 1 >= args.len() { eprintln!("--password requires a value"); print_usage(&program); std::process::exit(2); }
                password = Some(args[i + 1].clone());
                i += 2;
            }
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            other => {
                eprintln!("unknown argument: {}", other);
                print_usage(&program);
                std::process::exit(2);
            }
        }
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;
    let ctx = ConsoleContext::from_config(config).context("Failed to initialise console")?;

    match rt.block_on(ctx.start()) {
        Ok(Some(id)) => println!("resumed session for {}", id.subject_name),
        Ok(None) => {}
        Err(e) => eprintln!("stored session could not be resumed: {}", e),
    }
    if let (Some(u), Some(p)) = (user.as_deref(), password.as_deref()) {
        login(&rt, &ctx, u, p);
    }

    run_repl(&rt, &ctx)
}

fn run_repl(rt: &tokio::runtime::Runtime, ctx: &ConsoleContext) -> Result<()> {
    let mut editor = DefaultEditor::new().context("Failed to initialise line editor")?;
    println!("tenancy console. Type 'help' for commands.");
    loop {
        let line = match editor.readline("> ") {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("failed to read input"),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        // Keep passwords out of the history
        if !parts[0].eq_ignore_ascii_case("login") {
            let _ = editor.add_history_entry(line);
        }
        match parts[0].to_ascii_lowercase().as_str() {
            "quit" | "exit" => break,
            "help" => print_usage("console"),
            "login" => {
                if parts.len() < 3 { eprintln!("usage: login <user> <password>"); continue; }
                login(rt, ctx, parts[1], parts[2]);
            }
            "logout" => {
                rt.block_on(ctx.logout());
                println!("signed out");
            }
            "whoami" => match ctx.current_identity() {
                Some(id) => println!("{} roles=[{}]", id.subject_name, id.roles.join(", ")),
                None => println!("not signed in"),
            },
            "validate" => match rt.block_on(ctx.validate()) {
                Ok(id) => println!("session valid for {}", id.subject_name),
                Err(e) => report(&e),
            },
            "tenants" => {
                let page = parts.get(1).and_then(|p| p.parse().ok()).unwrap_or(0);
                let size = parts.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
                match rt.block_on(ctx.load_tenants(TenantQuery::page(page, size))) {
                    Ok(_) => {}
                    Err(e) => report(&e),
                }
                let selected = ctx.current_scope().tenant.map(|t| t.id);
                println!("{}", render_tenants(&ctx.tenant_list(), selected));
            }
            "use" if parts.len() >= 3 && parts[1].eq_ignore_ascii_case("tenant") => use_tenant(rt, ctx, parts[2]),
            "use" if parts.len() >= 3 && parts[1].eq_ignore_ascii_case("contract") => use_contract(ctx, parts[2]),
            "use" => eprintln!("usage: use tenant <id|none> | use contract <id|none>"),
            "contracts" => {
                if ctx.current_scope().tenant.is_some() {
                    if let Err(e) = rt.block_on(ctx.scope().refresh_contracts()) { report(&e); }
                }
                let scope = ctx.scope();
                let selected = ctx.current_scope().data_contract.map(|c| c.id);
                println!("{}", render_contracts(&scope.contracts(), scope.contract_phase(), selected));
            }
            "status" => {
                let id = ctx.current_identity();
                println!("{}", render_status(ctx.session_state(), id.as_ref(), &ctx.current_scope()));
                println!("api:      {}{}", ctx.config().base_url, ctx.config().api_prefix);
            }
            other => eprintln!("unknown command '{}'; type 'help'", other),
        }
    }
    Ok(())
}

fn login(rt: &tokio::runtime::Runtime, ctx: &ConsoleContext, user: &str, password: &str) {
    match rt.block_on(ctx.login(user, password)) {
        Ok(id) => {
            println!("signed in as {}", id.subject_name);
            if let Err(e) = rt.block_on(ctx.load_tenants(TenantQuery::default())) {
                report(&e);
            }
        }
        Err(e) => report(&e),
    }
}

fn use_tenant(rt: &tokio::runtime::Runtime, ctx: &ConsoleContext, arg: &str) {
    if arg.eq_ignore_ascii_case("none") {
        if let Err(e) = rt.block_on(ctx.select_tenant(None)) { report(&e); }
        return;
    }
    let Ok(id) = arg.parse::<i64>() else {
        eprintln!("tenant id must be a number");
        return;
    };
    let listed = ctx.tenant_list().tenants.into_iter().find(|t| t.id == id);
    let tenant = match listed {
        Some(t) => t,
        None => match rt.block_on(ctx.clients().get_tenant(id)) {
            Ok(t) => t,
            Err(e) => { report(&e); return; }
        },
    };
    let name = tenant.name.clone();
    match rt.block_on(ctx.select_tenant(Some(tenant))) {
        Ok(_) => println!("using tenant {} ({} data contracts)", name, ctx.scope().contracts().len()),
        Err(e) => report(&e),
    }
}

fn use_contract(ctx: &ConsoleContext, arg: &str) {
    if arg.eq_ignore_ascii_case("none") {
        if let Err(e) = ctx.select_data_contract(None) { report(&e); }
        return;
    }
    let Ok(id) = arg.parse::<i64>() else {
        eprintln!("contract id must be a number");
        return;
    };
    match ctx.scope().contracts().into_iter().find(|c| c.id == id) {
        Some(c) => {
            let name = c.name.clone();
            match ctx.select_data_contract(Some(c)) {
                Ok(()) => println!("using data contract {}", name),
                Err(e) => report(&e),
            }
        }
        None => eprintln!("data contract {} is not loaded for the selected tenant; run 'contracts'", id),
    }
}

fn report(e: &AppError) {
    match e {
        AppError::Validation { message, details, .. } if !details.is_empty() => {
            eprintln!("error: {}", message);
            for d in details {
                eprintln!("  - {}", d);
            }
        }
        other if other.is_retryable() => eprintln!("error: {} (retry later)", other.message()),
        other => eprintln!("error: {}", other.message()),
    }
}
