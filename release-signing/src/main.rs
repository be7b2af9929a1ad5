// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    log::LevelFilter,
    release_signing::{
        config::SigningConfig,
        context::SigningContext,
        dispatch::{reorder_formats, sign},
        script,
        server::ServerPool,
        signtool::get_token,
        task::{is_autograph_signing_format, Task},
        Result, SigningError,
    },
    std::path::PathBuf,
};

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

fn required_value<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    args.value_of(name)
        .ok_or_else(|| SigningError::Config(format!("missing argument {}", name)))
}

fn command_run(args: &ArgMatches) -> Result<()> {
    let config = SigningConfig::from_path(required_value(args, "config")?)?;
    let task = Task::from_path(required_value(args, "task")?)?;

    let artifacts = runtime()?.block_on(script::run(config, &task))?;

    for artifact in artifacts {
        println!("{}", artifact.display());
    }

    Ok(())
}

fn command_sign(args: &ArgMatches) -> Result<()> {
    let config = SigningConfig::from_path(required_value(args, "config")?)?;
    let cert_type = required_value(args, "cert_type")?;
    let formats = args
        .values_of("format")
        .map(|values| values.map(|s| s.to_string()).collect::<Vec<_>>())
        .unwrap_or_default();
    let path = PathBuf::from(required_value(args, "path")?);

    std::fs::create_dir_all(&config.work_dir)?;
    let pool = ServerPool::from_path(&config.signing_server_config)?;
    let ctx = SigningContext::new(config, pool, cert_type)?;

    let outputs = runtime()?.block_on(async {
        if !formats.iter().all(|f| is_autograph_signing_format(f)) {
            get_token(&ctx, &formats).await?;
        }

        sign(&ctx, &path, &formats).await
    })?;

    for output in outputs {
        println!("{}", output.display());
    }

    Ok(())
}

fn command_reorder_formats(args: &ArgMatches) -> Result<()> {
    let formats = args
        .values_of("format")
        .map(|values| values.collect::<Vec<_>>())
        .unwrap_or_default();

    for format in reorder_formats(&formats) {
        println!("{}", format);
    }

    Ok(())
}

fn main_impl() -> Result<()> {
    let app = Command::new("release-signing")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sign release artifacts through legacy signing servers and Autograph")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(
        Command::new("run")
            .about("Execute a signing task")
            .arg(
                Arg::new("config")
                    .long("config")
                    .takes_value(true)
                    .required(true)
                    .help("Path to the worker configuration JSON"),
            )
            .arg(
                Arg::new("task")
                    .long("task")
                    .takes_value(true)
                    .required(true)
                    .help("Path to the task definition JSON"),
            ),
    );

    let app = app.subcommand(
        Command::new("sign")
            .about("Sign a single file with one or more formats")
            .arg(
                Arg::new("config")
                    .long("config")
                    .takes_value(true)
                    .required(true)
                    .help("Path to the worker configuration JSON"),
            )
            .arg(
                Arg::new("cert_type")
                    .long("cert-type")
                    .takes_value(true)
                    .required(true)
                    .help("Cert type scope, e.g. project:releng:signing:cert:dep-signing"),
            )
            .arg(
                Arg::new("format")
                    .long("format")
                    .takes_value(true)
                    .multiple_occurrences(true)
                    .required(true)
                    .help("Signing format. Can be specified multiple times."),
            )
            .arg(
                Arg::new("path")
                    .required(true)
                    .help("Path of the file to sign"),
            ),
    );

    let app = app.subcommand(
        Command::new("reorder-formats")
            .about("Print the order signing formats are applied in")
            .arg(
                Arg::new("format")
                    .multiple_values(true)
                    .required(true)
                    .help("Signing formats"),
            ),
    );

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    if log_level == LevelFilter::Info {
        builder
            .filter_module("rustls", LevelFilter::Error)
            .filter_module("hyper", LevelFilter::Warn)
            .filter_module("reqwest", LevelFilter::Warn);
    }

    builder.init();

    match matches.subcommand() {
        Some(("run", args)) => command_run(args),
        Some(("sign", args)) => command_sign(args),
        Some(("reorder-formats", args)) => command_reorder_formats(args),
        _ => Err(SigningError::Config("unknown command".into())),
    }
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    };

    std::process::exit(exit_code)
}
