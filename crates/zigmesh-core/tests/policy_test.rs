// Reporting and binding policies, and post-discovery automation.

#![allow(clippy::unwrap_used)]

mod common;

use common::{MockDevice, MockRadio, engine_with, light};
use zigmesh_core::model::{attr_id, cluster_id, zcl_type};
use zigmesh_core::policy::{
    BindStatus, BindingRequest, PolicyTarget, ReportingEntry, ReportingPreset, ReportingRequest,
};
use zigmesh_core::radio::BindRequest;
use zigmesh_core::{
    AttrValue, Capabilities, Engine, EngineConfig, EngineError, Feature, IeeeAddr, ShortAddr,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn add(engine: &mut Engine<MockRadio>, radio: &MockRadio, short_addr: u16, device: MockDevice) {
    radio.add_device(short_addr, device);
    engine
        .discover_device(ShortAddr(short_addr), None, None)
        .await
        .unwrap();
}

fn thermostat(ieee: u8) -> MockDevice {
    MockDevice::new(ieee).endpoint(1, 0x0301, &[cluster_id::THERMOSTAT])
}

fn ias_sensor(ieee: u8) -> MockDevice {
    MockDevice::new(ieee).endpoint(1, 0x0402, &[cluster_id::IAS_ZONE])
}

fn feature(feature: Feature) -> PolicyTarget {
    PolicyTarget::Feature {
        feature,
        selector: None,
    }
}

// ── Reporting ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_reporting_failure_on_one_entry_is_partial() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x3001, thermostat(0x11)).await;
    let short = ShortAddr(0x3001);
    radio
        .state()
        .failing_reporting_attrs
        .insert((cluster_id::THERMOSTAT, attr_id::THERMOSTAT_SYSTEM_MODE));

    let request = ReportingRequest {
        target: feature(Feature::Thermostat),
        preset: None,
        overrides: Vec::new(),
        low_power: false,
    };
    let policies = engine.configure_reporting_policy(short, &request).unwrap();
    assert_eq!(policies.len(), 1);
    assert_eq!(policies[0].preset, Some(ReportingPreset::Thermostat));
    assert_eq!(policies[0].entries.len(), 3);

    let reports = engine.apply_reporting_policy(short, None).unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.applied, 2);
    assert_eq!(report.failed, 1);
    let failed: Vec<u16> = report
        .results
        .iter()
        .filter(|r| !r.ok)
        .map(|r| r.attr)
        .collect();
    assert_eq!(failed, vec![attr_id::THERMOSTAT_SYSTEM_MODE]);
    assert_eq!(radio.state().reporting.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reporting_overrides_and_low_power() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x3001, thermostat(0x11)).await;
    let short = ShortAddr(0x3001);

    let local_temp = ReportingEntry::new(
        cluster_id::THERMOSTAT,
        attr_id::THERMOSTAT_LOCAL_TEMPERATURE,
        zcl_type::S16,
        60,
        600,
        100,
    );
    let request = ReportingRequest {
        target: PolicyTarget::Endpoint(1),
        preset: Some(ReportingPreset::Thermostat),
        overrides: vec![local_temp],
        low_power: true,
    };
    let policy = engine
        .configure_reporting_policy(short, &request)
        .unwrap()
        .remove(0);
    assert_eq!(policy.entries.len(), 3);
    assert_eq!(policy.entries[0].min_interval, 60);
    assert_eq!(policy.entries[0].reportable_change, 100);
    assert!(policy.entries.iter().all(|e| e.min_interval >= 30 && e.max_interval >= 900));

    // Storing again for the same endpoint replaces it.
    engine
        .configure_reporting_policy(short, &ReportingRequest::preset(PolicyTarget::All, ReportingPreset::Thermostat))
        .unwrap();
    let stored = engine.reporting_policies(Some(short));
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].low_power);

    assert_eq!(engine.clear_reporting_policy(short, None), 1);
    assert!(matches!(
        engine.apply_reporting_policy(short, None),
        Err(EngineError::NotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_reporting_request_needs_entries_and_endpoint() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x2001, light(0x01)).await;
    let short = ShortAddr(0x2001);

    let no_preset = ReportingRequest {
        target: feature(Feature::OnOff),
        preset: None,
        overrides: Vec::new(),
        low_power: false,
    };
    assert!(matches!(
        engine.configure_reporting_policy(short, &no_preset),
        Err(EngineError::InvalidRange { .. })
    ));

    let missing_endpoint = ReportingRequest::preset(PolicyTarget::Endpoint(9), ReportingPreset::Occupancy);
    assert!(matches!(
        engine.configure_reporting_policy(short, &missing_endpoint),
        Err(EngineError::NotFound { .. })
    ));
    assert!(matches!(
        engine.configure_reporting_policy(ShortAddr(0x5555), &missing_endpoint),
        Err(EngineError::NotFound { .. })
    ));
    assert!(engine.reporting_policies(None).is_empty());
}

// ── Binding ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_ias_binding_enrolls_local_cie() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x3002, ias_sensor(0x12)).await;
    let short = ShortAddr(0x3002);
    let device_ieee = engine.get_device(short, false).unwrap().ieee_addr().unwrap();

    let policies = engine
        .configure_binding_policy(short, &BindingRequest::new(feature(Feature::IasZone)))
        .unwrap();
    assert_eq!(policies[0].clusters, vec![cluster_id::IAS_ZONE]);
    assert_eq!(policies[0].dst_endpoint, 1);

    let report = engine.apply_binding_policy(short, None).unwrap().remove(0);
    assert_eq!(report.status, BindStatus::Ok);
    assert!(report.enroll.unwrap().ok);

    let local = IeeeAddr([0xAA; 8]);
    let state = radio.state();
    assert_eq!(
        state.binds,
        vec![BindRequest {
            src_ieee: device_ieee,
            src_endpoint: 1,
            cluster: cluster_id::IAS_ZONE,
            dst_ieee: local,
            dst_endpoint: 1,
            req_dst_short: short,
        }]
    );
    assert_eq!(
        state.writes,
        vec![(
            short,
            1,
            cluster_id::IAS_ZONE,
            attr_id::IAS_CIE_ADDRESS,
            zcl_type::IEEE_ADDR,
            AttrValue::Bytes(vec![0xAA; 8]),
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn test_binding_reports_partial_failure() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x2001, light(0x01)).await;
    let short = ShortAddr(0x2001);
    radio
        .state()
        .failing_bind_clusters
        .insert(cluster_id::LEVEL_CONTROL);

    let policies = engine
        .configure_binding_policy(short, &BindingRequest::new(feature(Feature::Level)))
        .unwrap();
    assert_eq!(policies[0].clusters, vec![cluster_id::ON_OFF, cluster_id::LEVEL_CONTROL]);

    let report = engine.apply_binding_policy(short, Some(1)).unwrap().remove(0);
    assert_eq!(report.status, BindStatus::Partial);
    assert_eq!(report.failed_count(), 1);
    assert!(report.enroll.is_none());
    assert_eq!(radio.state().binds.len(), 1);

    assert_eq!(engine.binding_policies(None).len(), 1);
    assert_eq!(engine.clear_binding_policy(short, Some(2)), 0);
    assert_eq!(engine.clear_binding_policy(short, Some(1)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_binding_without_capability_fails_each_cluster() {
    let radio = MockRadio::with_caps(Capabilities {
        binding: false,
        ..Capabilities::all()
    });
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x2001, light(0x01)).await;
    let short = ShortAddr(0x2001);

    engine
        .configure_binding_policy(short, &BindingRequest::new(PolicyTarget::All))
        .unwrap();
    let report = engine.apply_binding_policy(short, None).unwrap().remove(0);
    assert_eq!(report.status, BindStatus::Failed);
    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|r| r.error.is_some()));
    assert!(radio.state().binds.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_binding_without_device_ieee_is_skipped() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    let mut anonymous = light(0x01);
    anonymous.ieee = None;
    add(&mut engine, &radio, 0x2001, anonymous).await;
    let short = ShortAddr(0x2001);

    engine
        .configure_binding_policy(short, &BindingRequest::new(feature(Feature::OnOff)))
        .unwrap();
    let report = engine.apply_binding_policy(short, None).unwrap().remove(0);
    assert_eq!(report.status, BindStatus::Skipped);
    assert!(report.reason.is_some());
    assert!(radio.state().binds.is_empty());
}

// ── Automation ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_discovery_runs_presets_and_default_bindings() {
    let radio = MockRadio::new();
    let config = EngineConfig {
        auto_configure_reporting: true,
        auto_bind: true,
        ..EngineConfig::default()
    };
    let (mut engine, _clock) = engine_with(&radio, config);
    let lock = MockDevice::new(0x13).endpoint(1, 0x000A, &[cluster_id::DOOR_LOCK]);
    add(&mut engine, &radio, 0x3003, lock).await;

    let stats = engine.automation_stats();
    assert_eq!(stats.reporting_applied, 1);
    assert_eq!(stats.reporting_failed, 0);
    assert_eq!(stats.bind_attempted, 1);
    assert_eq!(stats.bind_failed, 0);

    let state = radio.state();
    assert_eq!(state.reporting.len(), 1);
    assert_eq!(state.reporting[0].2.attr, attr_id::LOCK_STATE);
    assert_eq!(state.binds[0].cluster, cluster_id::DOOR_LOCK);
}

#[tokio::test(start_paused = true)]
async fn test_automation_counts_failures_without_raising() {
    let radio = MockRadio::with_caps(Capabilities {
        reporting: false,
        ..Capabilities::all()
    });
    radio.state().failing_bind_clusters.insert(cluster_id::ON_OFF);
    let config = EngineConfig {
        auto_configure_reporting: true,
        auto_bind: true,
        ..EngineConfig::default()
    };
    let (mut engine, _clock) = engine_with(&radio, config);
    let dimmer_sensor = MockDevice::new(0x14)
        .endpoint(1, 0x0104, &[cluster_id::ON_OFF, cluster_id::OCCUPANCY_SENSING]);
    add(&mut engine, &radio, 0x3004, dimmer_sensor).await;

    let stats = engine.automation_stats();
    assert_eq!(stats.reporting_applied, 0);
    assert_eq!(stats.reporting_failed, 1);
    assert_eq!(stats.bind_attempted, 2);
    assert_eq!(stats.bind_failed, 1);
    assert!(engine.get_device(ShortAddr(0x3004), false).is_some());
}
