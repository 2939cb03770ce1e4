// ── Descriptor discovery ──
//
// Request/poll pairs against the primitive layer: active endpoints,
// node descriptor, one simple descriptor per endpoint, and optionally
// the power descriptor. Polls yield to the runtime between checks.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::clock::millis;
use crate::config::EngineConfig;
use crate::error::{EngineError, RadioResultExt};
use crate::model::{DescriptorReport, GREEN_POWER_ENDPOINT, ShortAddr};
use crate::radio::{Capabilities, Radio, Snapshot};

/// Knobs for one discovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct DiscoveryOptions {
    /// Any missing snapshot fails the run.
    pub strict: bool,
    pub timeout: Duration,
    pub poll: Duration,
    pub include_power_desc: bool,
    pub include_green_power: bool,
    pub fallback_without_power_desc: bool,
    /// Skip the active-endpoint request and use these.
    pub endpoints: Option<Vec<u8>>,
    pub lookup_ieee: bool,
}

impl DiscoveryOptions {
    pub fn from_config(config: &EngineConfig, caps: &Capabilities) -> Self {
        Self {
            strict: config.strict_discovery,
            timeout: config.discover_timeout,
            poll: config.discover_poll,
            include_power_desc: config.include_power_desc && caps.power_descriptor,
            include_green_power: config.include_green_power,
            fallback_without_power_desc: config.fallback_without_power_desc,
            endpoints: None,
            lookup_ieee: caps.address_lookup,
        }
    }
}

/// Run full descriptor discovery for `short_addr`.
///
/// In non-strict mode a run that comes back empty is retried once
/// without the power descriptor when `fallback_without_power_desc` is
/// set. Strict mode surfaces the first failure.
pub async fn discover<R: Radio + ?Sized>(
    radio: &mut R,
    short_addr: ShortAddr,
    options: &DiscoveryOptions,
) -> Result<DescriptorReport, EngineError> {
    match run(radio, short_addr, options, options.include_power_desc).await {
        Ok(report) => Ok(report),
        Err(e) if !options.strict && options.include_power_desc && options.fallback_without_power_desc => {
            warn!(short_addr = %short_addr, error = %e, "discovery failed, retrying without power descriptor");
            run(radio, short_addr, options, false).await
        }
        Err(e) => Err(e),
    }
}

async fn run<R: Radio + ?Sized>(
    radio: &mut R,
    short_addr: ShortAddr,
    options: &DiscoveryOptions,
    with_power: bool,
) -> Result<DescriptorReport, EngineError> {
    let started = Instant::now();
    let mut report = DescriptorReport::new(short_addr);
    let mut received = 0usize;

    // Active endpoints
    let endpoints = match &options.endpoints {
        Some(explicit) => explicit.clone(),
        None => {
            let result = request_then_poll(
                "active endpoints",
                radio,
                |r| r.request_active_endpoints(short_addr).op("request_active_endpoints"),
                |r| r.poll_active_endpoints(),
                |s| s.short_addr == short_addr,
                options,
            )
            .await;
            match result {
                Ok(eps) => {
                    received += 1;
                    eps
                }
                Err(e) if options.strict => return Err(e),
                Err(e) => {
                    report.errors.push(format!("active_endpoints: {e}"));
                    Vec::new()
                }
            }
        }
    };
    let mut endpoints: Vec<u8> = endpoints
        .into_iter()
        .filter(|ep| *ep != 0 && (options.include_green_power || *ep != GREEN_POWER_ENDPOINT))
        .collect();
    endpoints.sort_unstable();
    endpoints.dedup();

    // Node descriptor
    let node = request_then_poll(
        "node descriptor",
        radio,
        |r| r.request_node_descriptor(short_addr).op("request_node_descriptor"),
        |r| r.poll_node_descriptor(),
        |s| s.short_addr == short_addr,
        options,
    )
    .await;
    match node {
        Ok(node) => {
            received += 1;
            report.node = Some(node);
        }
        Err(e) if options.strict => return Err(e),
        Err(e) => report.errors.push(format!("node_descriptor: {e}")),
    }

    // Simple descriptors
    for endpoint in endpoints {
        let simple = request_then_poll(
            "simple descriptor",
            radio,
            |r| {
                r.request_simple_descriptor(short_addr, endpoint)
                    .op("request_simple_descriptor")
            },
            |r| r.poll_simple_descriptor(),
            |s| s.short_addr == short_addr && s.body.endpoint == endpoint,
            options,
        )
        .await;
        match simple {
            Ok(desc) => {
                received += 1;
                report.endpoints.push(desc);
            }
            Err(e) if options.strict => return Err(e),
            Err(e) => report.errors.push(format!("simple_descriptor[{endpoint}]: {e}")),
        }
    }

    // Power descriptor
    if with_power {
        let power = request_then_poll(
            "power descriptor",
            radio,
            |r| r.request_power_descriptor(short_addr).op("request_power_descriptor"),
            |r| r.poll_power_descriptor(),
            |s| s.short_addr == short_addr,
            options,
        )
        .await;
        match power {
            Ok(power) => {
                received += 1;
                report.power = Some(power);
            }
            Err(e) if options.strict => return Err(e),
            Err(e) => report.errors.push(format!("power_descriptor: {e}")),
        }
    }

    if received == 0 {
        return Err(EngineError::Timeout {
            step: "descriptor discovery".into(),
            waited_ms: millis(started.elapsed()),
        });
    }

    if options.lookup_ieee {
        report.ieee_addr = radio.ieee_addr_of(short_addr);
    }
    debug!(
        short_addr = %short_addr,
        endpoints = report.endpoints.len(),
        errors = report.errors.len(),
        "descriptor discovery complete"
    );
    Ok(report)
}

/// Issue a request, then poll until a matching snapshot arrives or the
/// timeout elapses. Snapshots for another address are discarded.
async fn request_then_poll<R, T>(
    step: &str,
    radio: &mut R,
    request: impl FnOnce(&mut R) -> Result<(), EngineError>,
    mut poll: impl FnMut(&mut R) -> Option<Snapshot<T>>,
    accept: impl Fn(&Snapshot<T>) -> bool,
    options: &DiscoveryOptions,
) -> Result<T, EngineError>
where
    R: Radio + ?Sized,
{
    request(radio)?;
    let started = Instant::now();
    let deadline = started + options.timeout;
    loop {
        while let Some(snapshot) = poll(radio) {
            if !accept(&snapshot) {
                debug!(step, from = %snapshot.short_addr, "discarding unrelated snapshot");
                continue;
            }
            if snapshot.status != 0 {
                return Err(EngineError::Radio {
                    operation: step.into(),
                    status: i32::from(snapshot.status),
                });
            }
            return Ok(snapshot.body);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(EngineError::Timeout {
                step: step.into(),
                waited_ms: millis(now - started),
            });
        }
        sleep(options.poll.min(deadline - now)).await;
    }
}
