use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use warmpool::prelude::*;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// pool-sim: runs a session pool against a simulated, flaky remote service.
#[derive(Parser, Debug, Clone)]
#[command(name = "pool-sim")]
#[command(about = "Exercise a warm session pool against a simulated booking service")]
struct Args {
    /// Sessions kept warm
    #[arg(long, env = "POOL_SIZE", default_value = "10")]
    pool_size: usize,

    /// Lower bound of the randomized session expiry, in minutes
    #[arg(long, env = "EXPIRE_MIN_MINUTES", default_value = "10")]
    expire_min_minutes: u64,

    /// Upper bound of the randomized session expiry, in minutes
    #[arg(long, env = "EXPIRE_MAX_MINUTES", default_value = "14")]
    expire_max_minutes: u64,

    /// Keepalive interval in seconds
    #[arg(long, env = "CYCLE_EVERY_SECS", default_value = "60")]
    cycle_every_secs: u64,

    /// Timeout of each remote call in milliseconds
    #[arg(long, env = "CALL_TIMEOUT_MS", default_value = "20000")]
    call_timeout_ms: u64,

    /// Probability that a refresh candidate is rotated per pass
    #[arg(long, env = "REFRESH_CHANCE", default_value = "0.1")]
    refresh_chance: f64,

    /// Idle timeout of promised sessions in seconds
    #[arg(long, env = "PROMISE_TIMEOUT_SECS", default_value = "300")]
    promise_timeout_secs: u64,

    /// Probability that a simulated remote call fails
    #[arg(long, env = "SIM_FAILURE_RATE", default_value = "0.05")]
    sim_failure_rate: f64,

    /// Upper bound of simulated round-trip latency in milliseconds
    #[arg(long, env = "SIM_LATENCY_MS", default_value = "150")]
    sim_latency_ms: u64,

    /// Concurrent simulated callers
    #[arg(long, env = "SIM_WORKERS", default_value = "4")]
    sim_workers: usize,

    /// Stop on its own after this many seconds instead of waiting for a signal
    #[arg(long, env = "RUN_FOR_SECS")]
    run_for_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            pool_size: self.pool_size,
            expire: warmpool::ExpireScheme::new(
                self.expire_min_minutes,
                self.expire_max_minutes,
            ),
            cycle_every: Duration::from_secs(self.cycle_every_secs),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            refresh_chance: self.refresh_chance,
            promise_timeout: Duration::from_secs(self.promise_timeout_secs),
            ..PoolConfig::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated Session Service
// ---------------------------------------------------------------------------

/// A remote booking service that answers after a random delay and fails
/// every so often.
struct SimulatedService {
    failure_rate: f64,
    latency: Duration,
    next_token: AtomicU64,
}

impl SimulatedService {
    fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate: if failure_rate.is_nan() {
                0.0
            } else {
                failure_rate.clamp(0.0, 1.0)
            },
            latency,
            next_token: AtomicU64::new(1),
        }
    }

    /// Waits out a simulated round trip; `Err` means the "network" dropped it.
    async fn round_trip(&self) -> Result<(), ServiceError> {
        let (delay, dropped) = {
            let mut rng = rand::rng();
            let max_ms = self.latency.as_millis() as u64;
            (
                Duration::from_millis(rng.random_range(0..=max_ms)),
                rng.random_bool(self.failure_rate),
            )
        };
        tokio::time::sleep(delay).await;
        if dropped {
            Err(ServiceError::Network("simulated connection reset".into()))
        } else {
            Ok(())
        }
    }

    /// Half as likely as a network failure: the remote side forgot the session.
    fn session_forgotten(&self) -> bool {
        rand::rng().random_bool(self.failure_rate / 2.0)
    }
}

impl SessionService for SimulatedService {
    async fn create_session(&self) -> Result<CreateSessionRS, ServiceError> {
        self.round_trip().await?;
        let n = self.next_token.fetch_add(1, Ordering::Relaxed);
        Ok(CreateSessionRS {
            token: Some(format!(
                "Shared/IDL:IceSess\\/SessMgr:1\\.0.IDL/Common/!ICESMS\\/SIM!{n}"
            )),
            fault: None,
        })
    }

    async fn validate_session(&self, token: &str) -> Result<ValidateSessionRS, ServiceError> {
        self.round_trip().await?;
        if self.session_forgotten() {
            return Ok(ValidateSessionRS {
                token: None,
                status: ActionStatus::Error,
                fault: Some(warmpool::Fault::new(
                    "ERR.SWS.CLIENT.VALIDATION_FAILED",
                    "session not found",
                )),
            });
        }
        Ok(ValidateSessionRS {
            token: Some(token.to_string()),
            status: ActionStatus::Complete,
            fault: None,
        })
    }

    async fn close_session(&self, _token: &str) -> Result<CloseSessionRS, ServiceError> {
        self.round_trip().await?;
        Ok(CloseSessionRS {
            status: ActionStatus::Complete,
            fault: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Simulated callers
// ---------------------------------------------------------------------------

/// Picks sessions like a booking frontend would, until the pool shuts down.
/// Every fourth request runs a multi-step flow through a promise.
async fn worker(id: usize, pool: Arc<SessionPool<SimulatedService>>) -> u64 {
    let mut requests = 0u64;

    while !pool.is_shutting_down() {
        requests += 1;
        let think = Duration::from_millis(rand::rng().random_range(50..=250));

        if requests % 4 == 0 {
            let Ok(promise) = pool.pick_promise().await else {
                break;
            };
            for _ in 0..3 {
                tokio::time::sleep(think).await;
                promise.touch();
            }
            let reason = promise.release().await;
            debug!(worker = id, ?reason, "booking flow finished");
        } else {
            let Ok(session) = pool.pick().await else {
                break;
            };
            if !session.is_ok() {
                debug!(worker = id, session_id = %session.id(), "picked a bad session");
            }
            tokio::time::sleep(think).await;
            if pool.put(session).await.is_err() {
                break;
            }
        }
    }

    debug!(worker = id, requests, "worker stopped");
    requests
}

/// Logs pool counters every few seconds.
async fn reporter(pool: Arc<SessionPool<SimulatedService>>) {
    let mut every = tokio::time::interval(Duration::from_secs(5));
    every.tick().await;
    while !pool.is_shutting_down() {
        every.tick().await;
        let snap = pool.snapshot();
        info!(
            queued = snap.queued,
            leased = snap.leased,
            bad_sessions = snap.bad_sessions,
            cycles = snap.cycles,
            replaced = snap.replaced,
            refreshed = snap.refreshed,
            "pool status"
        );
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    info!(
        pool_size = args.pool_size,
        workers = args.sim_workers,
        failure_rate = args.sim_failure_rate,
        "starting pool-sim"
    );

    let service = SimulatedService::new(
        args.sim_failure_rate,
        Duration::from_millis(args.sim_latency_ms),
    );
    let pool = PoolBuilder::new().config(args.pool_config()).build(service);

    let mut workers = Vec::with_capacity(args.sim_workers);
    for id in 0..args.sim_workers {
        workers.push(tokio::spawn(worker(id, Arc::clone(&pool))));
    }
    tokio::spawn(reporter(Arc::clone(&pool)));

    if let Some(secs) = args.run_for_secs {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!(secs, "run time elapsed");
            pool.signal_shutdown();
        });
    }

    let report = daemonize(Arc::clone(&pool), &TerminationSignal::DEFAULT).await?;

    let mut requests = 0;
    for handle in workers {
        match handle.await {
            Ok(n) => requests += n,
            Err(e) => warn!(error = %e, "worker task failed"),
        }
    }

    info!(requests, "simulation finished");
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("{}", serde_json::to_string_pretty(&pool.snapshot())?);
    Ok(())
}
