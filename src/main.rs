use axum::Router;
use delay_scheduler::config::SchedulerConfig;
use delay_scheduler::coordination::Coordinator;
use delay_scheduler::coordination::client::HttpCoordinator;
use delay_scheduler::coordination::handlers::{self as coordination_handlers, CoordinationServer};
use delay_scheduler::coordination::memory::MemoryEnsemble;
use delay_scheduler::scheduler::executor::{TaskExecutor, handler_fn};
use delay_scheduler::scheduler::handlers as status_handlers;
use delay_scheduler::scheduler::{TaskHandle, TaskProgressRegistry, TaskScheduler};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        eprintln!(
            "Usage: {} [--bind <addr:port>] [--coord <addr:port>]... [--root <path>] [--workers <n>]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:2181", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:3000 --coord 127.0.0.1:2181",
            args[0]
        );

        std::process::exit(1);
    }

    let mut config = SchedulerConfig::default();
    let mut coord_hosts: Vec<String> = vec![];

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                config.bind = arg_value(&args, i)?.to_string();
                i += 2;
            }
            "--coord" => {
                coord_hosts.push(arg_value(&args, i)?.to_string());
                i += 2;
            }
            "--root" => {
                config.root = arg_value(&args, i)?.to_string();
                i += 2;
            }
            "--workers" => {
                config.workers = arg_value(&args, i)?.parse()?;
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr: SocketAddr = config.bind.parse()?;
    let mut app = Router::new();

    // 1. Coordination service (hosted here, or remote):
    let client: Arc<dyn Coordinator> = if coord_hosts.is_empty() {
        tracing::info!("Hosting coordination service on {}", bind_addr);
        let ensemble = MemoryEnsemble::new();
        let server = CoordinationServer::new(ensemble.clone(), &config.coordination);
        tokio::spawn(server.clone().reaper_loop());
        app = app.merge(coordination_handlers::router(server));
        ensemble.connect()
    } else {
        tracing::info!("Coordination hosts: {:?}", coord_hosts);
        config.coordination.hosts = coord_hosts;
        HttpCoordinator::connect(config.coordination.clone()).await?
    };
    tracing::info!("Coordination session {}", client.session_id());

    // 2. Scheduler and progress registry:
    let scheduler = Arc::new(TaskScheduler::new(client.clone(), &config).await?);
    let progress = TaskProgressRegistry::new(client.clone(), &config.tasks_path()).await?;

    // 3. Workers:
    let handler = handler_fn(|task: TaskHandle| async move {
        tracing::info!("Executing task {}", task.id());
        for step in 1..=10 {
            if task.is_cancelled().await {
                tracing::info!("Task {} observed cancellation at step {}", task.id(), step);
                return anyhow::Ok(());
            }
            task.set_progress(step * 10).await?;
            task.set_message(&format!("step {} of 10", step)).await?;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        anyhow::Ok(())
    });

    let executor = TaskExecutor::new(
        scheduler.clone(),
        progress.clone(),
        handler,
        config.workers,
        config.poll_timeout(),
    );
    let workers = executor.start().await;

    // 4. Spawn stats reporter:
    let stats_scheduler = scheduler.clone();
    let stats_progress = progress.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let scheduled = stats_scheduler.get_scheduled(i64::MIN, i64::MAX, usize::MAX).await;
            let running = stats_progress.get_progress().await;
            tracing::info!(
                "Scheduler stats: {} scheduled, {} reporting progress",
                scheduled.len(),
                running.len()
            );
        }
    });

    // 5. Start HTTP server:
    let app = app.merge(status_handlers::router(scheduler.clone(), progress.clone()));

    tracing::info!("HTTP server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await?;

    for worker in workers {
        worker.abort();
    }
    scheduler.shutdown().await;

    Ok(())
}

fn arg_value(args: &[String], i: usize) -> anyhow::Result<&str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("{} expects a value", args[i]))
}
