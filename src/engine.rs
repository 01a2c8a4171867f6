use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::models::{ProbeOutcome, Status, Target};
use crate::report::Reporter;
use crate::sip;
use crate::state::StateStore;

const RECEIVE_BUFFER_SIZE: usize = 2048;

pub struct Monitor {
    pub config: MonitorConfig,
    targets: Vec<Target>,
    source_ip: IpAddr,
    pub state: Arc<StateStore>,
    dns_resolver: TokioResolver,
    shutdown: CancellationToken,
}

impl Monitor {
    pub async fn new(config: MonitorConfig, shutdown: CancellationToken) -> Result<Self> {
        let dns_resolver = TokioResolver::builder_with_config(
            ResolverConfig::cloudflare(),
            TokioConnectionProvider::default(),
        )
        .build();

        let source_ip = resolve_source_ip(config.source_ip.as_deref()).await?;
        let targets: Vec<Target> = config
            .targets
            .iter()
            .map(|t| Target {
                address: t.address.clone(),
                port: t.port,
                source_ip,
                source_port: config.source_port,
            })
            .collect();

        let state = Arc::new(StateStore::new(targets.iter().map(Target::label)));

        Ok(Self {
            config,
            targets,
            source_ip,
            state,
            dns_resolver,
            shutdown,
        })
    }

    /// Main monitoring loop. Probes every target once per cycle, then checks
    /// the report cadence. The next cycle starts `interval` after the prior
    /// one began; cycles slower than the interval run back to back. Stops at
    /// the next cycle boundary after the shutdown token fires.
    pub async fn run(self: Arc<Self>, mut reporter: Reporter) {
        let interval = Duration::from_secs(self.config.interval_secs);

        info!(
            "Monitor started. Source for SIP headers: {}:{}",
            self.source_ip, self.config.source_port
        );
        info!(
            "Targets: {}",
            self.targets.iter().map(Target::label).collect::<Vec<_>>().join(", ")
        );
        info!(
            "Interval: {}s, receive timeout: {}s, report interval: {}s",
            self.config.interval_secs,
            self.config.receive_timeout_secs,
            self.config.report_interval_secs
        );

        loop {
            let start_time = Instant::now();
            self.run_cycle().await;
            let elapsed = start_time.elapsed();
            info!(
                "Check cycle completed {} probes in {:.2}s.",
                self.targets.len(),
                elapsed.as_secs_f64()
            );

            reporter.maybe_report(Utc::now(), &self.state).await;

            if self.shutdown.is_cancelled() {
                break;
            }
            let wait = interval.saturating_sub(elapsed);
            if !wait.is_zero() {
                debug!("Waiting {:.2}s until next check cycle...", wait.as_secs_f64());
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = self.shutdown.cancelled() => break,
                }
            }
        }
        info!("Monitor loop stopped.");
    }

    /// Probes all targets concurrently and commits each outcome to the state
    /// store. A slow or unreachable target never delays the others beyond its
    /// own receive timeout, and no individual failure aborts the cycle.
    pub async fn run_cycle(self: &Arc<Self>) {
        let mut tasks = FuturesUnordered::new();
        for target in self.targets.clone() {
            let monitor = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let outcome = monitor.probe(&target).await;
                debug!("Probe {}: {:?}", target.label(), outcome);
                if let Some(event) = monitor.state.apply(&target.label(), outcome, Utc::now()).await
                {
                    let msg = format!(
                        "[CHANGE] {} changed from {:?} to {:?}",
                        event.target, event.old_status, event.new_status
                    );
                    if event.new_status == Status::Failed {
                        error!("{}", msg);
                    } else {
                        warn!("{}", msg);
                    }
                }
            }));
        }

        while let Some(join_res) = tasks.next().await {
            if join_res.is_err() {
                error!("Probe task panicked");
            }
        }
    }

    /// Sends one OPTIONS request over a fresh socket and classifies whatever
    /// comes back. Every transport failure along the way, including DNS,
    /// classifies as unreachable rather than propagating.
    async fn probe(&self, target: &Target) -> ProbeOutcome {
        let target_ip = match self.resolve(&target.address).await {
            Ok(ip) => ip,
            Err(e) => {
                debug!("Could not resolve {}: {}", target.address, e);
                return ProbeOutcome::Unreachable;
            }
        };

        let request = sip::build_options_request(target, &self.config.user_agent);

        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(e) => {
                debug!("Socket error for {}: {}", target.label(), e);
                return ProbeOutcome::Unreachable;
            }
        };
        if let Err(e) = socket.send_to(&request, (target_ip, target.port)).await {
            debug!("Send error for {}: {}", target.label(), e);
            return ProbeOutcome::Unreachable;
        }

        let timeout = Duration::from_secs(self.config.receive_timeout_secs);
        let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
        match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
            Err(_) => {
                debug!("No response from {} (timeout)", target.label());
                ProbeOutcome::Unreachable
            }
            Ok(Err(e)) => {
                debug!("Receive error for {}: {}", target.label(), e);
                ProbeOutcome::Unreachable
            }
            Ok(Ok((len, from))) => sip::classify_response(&buf[..len], from.ip(), target_ip),
        }
    }

    async fn resolve(&self, address: &str) -> Result<IpAddr, String> {
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Ok(ip);
        }
        match self.dns_resolver.lookup_ip(address).await {
            Ok(lookup) => lookup.iter().next().ok_or_else(|| "no address found".into()),
            Err(e) => Err(format!("DNS resolution failed: {}", e)),
        }
    }
}

/// Resolves the source address written into SIP headers. A missing or
/// wildcard setting triggers autodetection via a transient outbound
/// association; on failure the wildcard is kept with a warning. An address
/// that is present but unparseable is a configuration error.
async fn resolve_source_ip(configured: Option<&str>) -> Result<IpAddr> {
    match configured {
        Some(raw) if raw != "0.0.0.0" => raw
            .parse::<IpAddr>()
            .with_context(|| format!("Invalid source_ip '{}'", raw)),
        _ => {
            warn!("source_ip not set. Trying autodetection...");
            match detect_source_ip().await {
                Some(ip) => {
                    info!("Automatically determined source address: {}", ip);
                    Ok(ip)
                }
                None => {
                    warn!(
                        "Could not determine source address; using 0.0.0.0. \
                         The wrong network interface may end up in SIP headers."
                    );
                    Ok(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
                }
            }
        }
    }
}

async fn detect_source_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect(("8.8.8.8", 80)).await.ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{Alert, AlertSink};
    use crate::config::TargetConfig;
    use crate::report::Reporter;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingSink {
        alerts: std::sync::Mutex<Vec<Alert>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn notify(&self, alert: &Alert) -> Result<()> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    fn test_config(targets: Vec<TargetConfig>, receive_timeout_secs: u64) -> MonitorConfig {
        MonitorConfig {
            targets,
            source_ip: Some("127.0.0.1".into()),
            source_port: 5084,
            interval_secs: 1,
            receive_timeout_secs,
            report_interval_secs: 3600,
            user_agent: "test monitor".into(),
            alerts: Default::default(),
        }
    }

    /// Answers every incoming request with a 200 OK status line.
    async fn spawn_ok_responder() -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
            while let Ok((_, peer)) = socket.recv_from(&mut buf).await {
                let _ = socket
                    .send_to(b"SIP/2.0 200 OK\r\nContent-Length: 0\r\n\r\n", peer)
                    .await;
            }
        });
        port
    }

    async fn unused_port() -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.local_addr().unwrap().port()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cycle_marks_responder_ok_and_silent_target_failed() {
        let ok_port = spawn_ok_responder().await;
        let dead_port = unused_port().await;

        let config = test_config(
            vec![
                TargetConfig { address: "127.0.0.1".into(), port: ok_port },
                TargetConfig { address: "127.0.0.1".into(), port: dead_port },
            ],
            1,
        );
        let monitor = Arc::new(Monitor::new(config, CancellationToken::new()).await.unwrap());
        monitor.run_cycle().await;

        let up = monitor.state.get(&format!("127.0.0.1:{}", ok_port)).await;
        assert_eq!(up.status, Status::Ok);
        assert!(up.since.is_some());

        let down = monitor.state.get(&format!("127.0.0.1:{}", dead_port)).await;
        assert_eq!(down.status, Status::Failed);
        assert!(down.since.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_target_stays_unknown_after_first_cycle() {
        let ok_port = spawn_ok_responder().await;
        let dead_port = unused_port().await;
        let config = test_config(
            vec![
                TargetConfig { address: "127.0.0.1".into(), port: ok_port },
                TargetConfig { address: "127.0.0.1".into(), port: dead_port },
            ],
            1,
        );
        let monitor = Arc::new(Monitor::new(config, CancellationToken::new()).await.unwrap());
        monitor.run_cycle().await;

        for (_, state) in monitor.state.snapshot().await {
            assert_ne!(state.status, Status::Unknown);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_cycles_keep_original_since() {
        let dead_port = unused_port().await;
        let config = test_config(
            vec![TargetConfig { address: "127.0.0.1".into(), port: dead_port }],
            1,
        );
        let monitor = Arc::new(Monitor::new(config, CancellationToken::new()).await.unwrap());

        monitor.run_cycle().await;
        let first = monitor.state.get(&format!("127.0.0.1:{}", dead_port)).await;
        monitor.run_cycle().await;
        let second = monitor.state.get(&format!("127.0.0.1:{}", dead_port)).await;

        assert_eq!(first.since, second.since);
    }

    // Drives the full loop against real sockets: the report cadence fires
    // exactly once listing only the silent target, and cancellation makes
    // run() return after the in-flight cycle. Wall-clock based because the
    // report cadence is measured with chrono, not the tokio clock.
    #[tokio::test(flavor = "multi_thread")]
    async fn run_reports_silent_target_and_stops_on_cancel() {
        let ok_port = spawn_ok_responder().await;
        let dead_port = unused_port().await;

        let mut config = test_config(
            vec![
                TargetConfig { address: "127.0.0.1".into(), port: ok_port },
                TargetConfig { address: "127.0.0.1".into(), port: dead_port },
            ],
            1,
        );
        config.report_interval_secs = 2;

        let shutdown = CancellationToken::new();
        let monitor = Arc::new(Monitor::new(config, shutdown.clone()).await.unwrap());
        assert_eq!(monitor.source_ip, "127.0.0.1".parse::<IpAddr>().unwrap());

        let sink = Arc::new(RecordingSink::default());
        let reporter = Reporter::new(2, vec![sink.clone() as Arc<dyn AlertSink>], Utc::now());
        let handle = tokio::spawn(Arc::clone(&monitor).run(reporter));

        let deadline = Instant::now() + Duration::from_secs(10);
        while sink.alerts.lock().unwrap().is_empty() {
            assert!(Instant::now() < deadline, "no report fired within 10s");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("run did not return after cancellation")
            .unwrap();

        let alerts = sink.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        let listing: Vec<&str> = alerts[0]
            .body
            .lines()
            .filter(|l| l.starts_with("- "))
            .collect();
        assert_eq!(listing.len(), 1);
        assert!(listing[0]
            .starts_with(&format!("- 127.0.0.1:{}: unavailable since", dead_port)));

        // The loop finished its cycles before returning.
        let up = monitor.state.get(&format!("127.0.0.1:{}", ok_port)).await;
        assert_eq!(up.status, Status::Ok);
    }

    // Verifies parallel dispatch: three timing-out probes take about one
    // receive timeout, not three. Uses the paused clock so the timeouts
    // elapse virtually.
    #[tokio::test(start_paused = true)]
    async fn probes_run_concurrently_not_sequentially() {
        let mut targets = Vec::new();
        for _ in 0..3 {
            targets.push(TargetConfig {
                address: "127.0.0.1".into(),
                port: unused_port().await,
            });
        }
        let timeout_secs = 2;
        let config = test_config(targets, timeout_secs);
        let monitor = Arc::new(Monitor::new(config, CancellationToken::new()).await.unwrap());

        let start = Instant::now();
        monitor.run_cycle().await;
        let elapsed = start.elapsed();

        assert!(
            elapsed < Duration::from_secs(2 * timeout_secs),
            "cycle took {:?}, probes appear to run sequentially",
            elapsed
        );
    }
}
