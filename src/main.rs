#[macro_use]
extern crate prettytable;
use creationrepro::{
    config::{init_app, Config},
    lifecycle::{LifecycleRecord, TrialResult},
    observe::LogObserver,
    orchestrator::{ExecutionMode, Orchestrator},
    retry::{Remote, RetryPolicy, TokioSuspend},
    service::SqlServerService,
    TRANSIENT_RETRY_COUNT, VISIBILITY_WAIT_COUNT,
};
use slog::{info, o, Drain, Logger};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time,
};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = init_app();
    let log = init_logger(&config);
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })?;
    }
    let service = Arc::new(SqlServerService::new(&config)?);
    info!(log, "initialized"; "config" => ?config);

    let remote = Arc::new(Remote::new(
        service,
        RetryPolicy {
            backoff: config.backoff,
            max_attempts: config.max_attempts,
        },
        Arc::new(TokioSuspend),
        Arc::new(LogObserver::new(log.clone())),
        shutdown,
    ));
    let orchestrator = Orchestrator {
        remote,
        prefix: config.prefix.clone(),
        poll_interval: config.poll_interval,
        max_visibility_waits: config.max_visibility_waits,
        mode: if config.sequential {
            ExecutionMode::Sequential
        } else {
            ExecutionMode::Concurrent
        },
    };

    let start = time::Instant::now();
    let records = orchestrator.run_all(config.count).await;
    info!(
        log,
        "all trials finished";
        "trials" => records.len(),
        "elapsed secs" => start.elapsed().as_secs()
    );
    print_result(log, &records);
    Ok(())
}

fn init_logger(config: &Config) -> Logger {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&config.log_path)
        .unwrap();
    let file_decorator = slog_term::PlainSyncDecorator::new(file);
    // also print the trial lines to the terminal
    let term_decorator = slog_term::TermDecorator::new().build();
    let file_drain = slog_term::FullFormat::new(file_decorator)
        .use_file_location()
        .build();
    let term_drain = slog_async::Async::new(
        slog::LevelFilter::new(
            slog_term::FullFormat::new(term_decorator).build(),
            slog::Level::Info,
        )
        .fuse(),
    )
    .build();
    let drain = slog::Duplicate::new(file_drain, term_drain).fuse();
    slog::Logger::root(drain, o!())
}

fn print_result(log: Logger, records: &[LifecycleRecord]) {
    let completed = records
        .iter()
        .filter(|r| matches!(r.result, Some(TrialResult::Completed)))
        .count();
    info!(
        log,
        "run summary";
        "trials" => records.len(),
        "completed" => completed,
        "abandoned" => records.len() - completed,
        "transient retries" => TRANSIENT_RETRY_COUNT.load(Ordering::SeqCst),
        "visibility waits" => VISIBILITY_WAIT_COUNT.load(Ordering::SeqCst)
    );
    let mut table = prettytable::Table::new();
    table.add_row(row![
        "database",
        "result",
        "checks",
        "creates",
        "deletes",
        "visibility waits",
    ]);
    for record in records {
        let result = match &record.result {
            Some(TrialResult::Completed) => "completed".to_owned(),
            Some(TrialResult::Abandoned(reason)) => format!("abandoned: {}", reason),
            None => "unfinished".to_owned(),
        };
        table.add_row(row![
            record.name,
            result,
            record.check_attempts,
            record.create_attempts,
            record.delete_attempts,
            record.visibility_waits,
        ]);
    }
    table.printstd();
}
