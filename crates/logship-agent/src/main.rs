// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;

use std::{env, process};

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logship::config::AgentConfig;
use logship::dispatcher::Dispatcher;
use logship::plugin::{build_input, build_output};
use tokio_util::sync::CancellationToken;

const DEFAULT_LOG_LEVEL: &str = "info";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOGSHIP_LOG_LEVEL")
        .map(|val| val.trim().to_lowercase())
        .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

    let env_filter = EnvFilter::try_new(format!("rustls=off,{log_level}"))
        .unwrap_or_else(|_| EnvFilter::new(format!("rustls=off,{DEFAULT_LOG_LEVEL}")));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .event_format(logger::Formatter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }

    debug!("Logging subsystem enabled");

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            process::exit(1);
        }
    };

    let cancel_token = CancellationToken::new();
    let (mut dispatcher, sink) = Dispatcher::new(config.queue_size, cancel_token.clone());

    for output_config in &config.outputs {
        match build_output(output_config, cancel_token.clone()) {
            Ok(output) => dispatcher.add_output(output),
            Err(e) => {
                error!(kind = output_config.kind(), "failed to start output: {e}");
                process::exit(1);
            }
        }
    }

    let mut inputs = Vec::with_capacity(config.inputs.len());
    for input_config in &config.inputs {
        match build_input(input_config, sink.clone(), cancel_token.clone()).await {
            Ok(input) => inputs.push(tokio::spawn(input.run())),
            Err(e) => {
                error!(kind = input_config.kind(), "failed to start input: {e}");
                process::exit(1);
            }
        }
    }
    // Only the inputs hold senders now, so the dispatcher ends once they all stop.
    drop(sink);

    let dispatcher_task = tokio::spawn(dispatcher.run());
    info!(
        inputs = config.inputs.len(),
        outputs = config.outputs.len(),
        "logship agent started"
    );

    shutdown_signal().await;
    info!("shutting down");
    cancel_token.cancel();

    for input in inputs {
        if let Err(e) = input.await {
            error!("input task failed: {e}");
        }
    }
    if let Err(e) = dispatcher_task.await {
        error!("dispatcher task failed: {e}");
    }
    info!("logship agent stopped");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!("failed to listen for ctrl-c: {e}");
                        }
                    }
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => error!("failed to install SIGTERM handler: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
    }
}
