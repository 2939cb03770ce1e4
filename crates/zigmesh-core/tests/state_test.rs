// Attribute routing, cached reads, control and device lifecycle.

#![allow(clippy::unwrap_used)]

mod common;

use common::{MockDevice, MockRadio, engine_with, light, ms};
use zigmesh_core::model::{attr_id, cluster_id};
use zigmesh_core::{
    AttrValue, AttributeEvent, ControlCommand, Engine, EngineConfig, EngineError, Feature,
    RadioEvent, ShortAddr, StaleReadPolicy, StateSource,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn add(engine: &mut Engine<MockRadio>, radio: &MockRadio, short_addr: u16, device: MockDevice) {
    radio.add_device(short_addr, device);
    engine
        .discover_device(ShortAddr(short_addr), None, None)
        .await
        .unwrap();
}

fn on_off_report(source: Option<u16>, endpoint: u8, on: bool, status: u8) -> RadioEvent {
    RadioEvent::Attribute(AttributeEvent {
        source_short_addr: source.map(ShortAddr),
        endpoint,
        cluster: cluster_id::ON_OFF,
        attr: attr_id::ON_OFF,
        value: AttrValue::Bool(on),
        status,
        attr_type: Some(0x10),
    })
}

fn cached_on_off(engine: &Engine<MockRadio>, short_addr: u16, endpoint: Option<u8>) -> Option<AttrValue> {
    engine
        .read_state(ShortAddr(short_addr), endpoint, cluster_id::ON_OFF, attr_id::ON_OFF, true)
        .unwrap()
        .map(|entry| entry.value)
}

// ── Attribute routing ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_attributed_report_updates_both_views() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x2001, light(0x01)).await;

    engine.handle_event(on_off_report(Some(0x2001), 1, true, 0)).await;

    let entry = engine
        .read_state(ShortAddr(0x2001), Some(1), cluster_id::ON_OFF, attr_id::ON_OFF, false)
        .unwrap()
        .unwrap();
    assert_eq!(entry.value, AttrValue::Bool(true));
    assert_eq!(entry.meta.source, StateSource::Attribute);
    assert!(entry.meta.authoritative);
    assert_eq!(entry.meta.endpoint, Some(1));
    assert_eq!(entry.meta.source_short_addr, Some(ShortAddr(0x2001)));
    assert_eq!(entry.meta.source_endpoint, Some(1));
    assert_eq!(entry.meta.attr_type, Some(0x10));

    // Endpoint 1 is the default for on/off, so the aggregate mirrors it.
    assert_eq!(cached_on_off(&engine, 0x2001, None), Some(AttrValue::Bool(true)));
}

#[tokio::test(start_paused = true)]
async fn test_reports_for_unmapped_endpoints_or_failures_are_dropped() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x2001, light(0x01)).await;

    engine.handle_event(on_off_report(Some(0x2001), 2, true, 0)).await;
    engine.handle_event(on_off_report(Some(0x2001), 1, true, 0x86)).await;
    engine.handle_event(on_off_report(Some(0x7777), 1, true, 0)).await;

    assert_eq!(cached_on_off(&engine, 0x2001, Some(2)), None);
    assert_eq!(cached_on_off(&engine, 0x2001, Some(1)), None);
    assert_eq!(cached_on_off(&engine, 0x2001, None), None);
}

#[tokio::test(start_paused = true)]
async fn test_unattributed_report_fans_out_to_matching_devices() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x2001, light(0x01)).await;
    add(&mut engine, &radio, 0x2002, light(0x02)).await;
    add(
        &mut engine,
        &radio,
        0x2003,
        MockDevice::new(0x03).endpoint(1, 0x0302, &[cluster_id::TEMPERATURE_MEASUREMENT]),
    )
    .await;

    engine.handle_event(on_off_report(None, 1, true, 0)).await;

    assert_eq!(cached_on_off(&engine, 0x2001, Some(1)), Some(AttrValue::Bool(true)));
    assert_eq!(cached_on_off(&engine, 0x2002, Some(1)), Some(AttrValue::Bool(true)));
    assert_eq!(cached_on_off(&engine, 0x2003, Some(1)), None);
    let meta = engine
        .state_info(ShortAddr(0x2002), Some(1), cluster_id::ON_OFF, attr_id::ON_OFF)
        .unwrap()
        .unwrap()
        .meta;
    assert_eq!(meta.source_short_addr, None);
}

// ── TTL and stale reads ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_refresh_policy_goes_back_to_the_radio() {
    let radio = MockRadio::new();
    let config = EngineConfig {
        state_ttl: ms(1_000),
        stale_read_policy: StaleReadPolicy::Refresh,
        ..EngineConfig::default()
    };
    let (mut engine, clock) = engine_with(&radio, config);
    add(&mut engine, &radio, 0x2001, light(0x01)).await;
    radio.state().attributes.insert(
        (ShortAddr(0x2001), 1, cluster_id::ON_OFF, attr_id::ON_OFF),
        AttrValue::Bool(false),
    );
    engine.handle_event(on_off_report(Some(0x2001), 1, true, 0)).await;

    let fresh = engine
        .read_attribute(ShortAddr(0x2001), None, cluster_id::ON_OFF, attr_id::ON_OFF, true)
        .unwrap();
    assert_eq!(fresh, AttrValue::Bool(true));
    assert_eq!(radio.state().read_calls, 0);

    clock.advance(ms(1_500));
    assert_eq!(
        engine
            .read_state(ShortAddr(0x2001), Some(1), cluster_id::ON_OFF, attr_id::ON_OFF, false)
            .unwrap(),
        None
    );
    let reread = engine
        .read_attribute(ShortAddr(0x2001), None, cluster_id::ON_OFF, attr_id::ON_OFF, true)
        .unwrap();
    assert_eq!(reread, AttrValue::Bool(false));
    assert_eq!(radio.state().read_calls, 1);

    let info = engine
        .state_info(ShortAddr(0x2001), Some(1), cluster_id::ON_OFF, attr_id::ON_OFF)
        .unwrap()
        .unwrap();
    assert_eq!(info.meta.source, StateSource::Read);
    assert!(info.meta.authoritative);
    assert!(!info.stale);
}

#[tokio::test(start_paused = true)]
async fn test_raise_policy_reports_age() {
    let radio = MockRadio::new();
    let config = EngineConfig {
        state_ttl: ms(1_000),
        stale_read_policy: StaleReadPolicy::Raise,
        ..EngineConfig::default()
    };
    let (mut engine, clock) = engine_with(&radio, config);
    add(&mut engine, &radio, 0x2001, light(0x01)).await;
    engine.handle_event(on_off_report(Some(0x2001), 1, true, 0)).await;

    clock.advance(ms(1_500));
    let err = engine
        .read_state(ShortAddr(0x2001), Some(1), cluster_id::ON_OFF, attr_id::ON_OFF, false)
        .unwrap_err();
    assert!(matches!(err, EngineError::StaleState { age_ms: 1_500, .. }));

    assert_eq!(cached_on_off(&engine, 0x2001, Some(1)), Some(AttrValue::Bool(true)));
    let info = engine
        .state_info(ShortAddr(0x2001), Some(1), cluster_id::ON_OFF, attr_id::ON_OFF)
        .unwrap()
        .unwrap();
    assert!(info.stale);

    // Bypassing the cache always works.
    radio.state().attributes.insert(
        (ShortAddr(0x2001), 1, cluster_id::ON_OFF, attr_id::ON_OFF),
        AttrValue::Bool(true),
    );
    engine
        .read_attribute(ShortAddr(0x2001), Some(1), cluster_id::ON_OFF, attr_id::ON_OFF, false)
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_read_of_unknown_cluster_is_not_found() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x2001, light(0x01)).await;

    let err = engine
        .read_attribute(ShortAddr(0x2001), None, cluster_id::DOOR_LOCK, attr_id::LOCK_STATE, true)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));

    let err = engine
        .read_attribute(ShortAddr(0x2001), Some(1), cluster_id::ON_OFF, attr_id::ON_OFF, false)
        .unwrap_err();
    assert!(matches!(err, EngineError::Radio { status: 0x86, .. }));
}

// ── Control ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_control_writes_optimistic_state() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x2001, light(0x01)).await;

    assert_eq!(engine.control(ShortAddr(0x2001), ControlCommand::On, None).unwrap(), 1);
    let entry = engine
        .read_state(ShortAddr(0x2001), Some(1), cluster_id::ON_OFF, attr_id::ON_OFF, false)
        .unwrap()
        .unwrap();
    assert_eq!(entry.value, AttrValue::Bool(true));
    assert_eq!(entry.meta.source, StateSource::Control);
    assert!(!entry.meta.authoritative);

    engine
        .control(ShortAddr(0x2001), ControlCommand::Toggle, None)
        .unwrap();
    assert_eq!(cached_on_off(&engine, 0x2001, Some(1)), Some(AttrValue::Bool(false)));

    engine
        .control(
            ShortAddr(0x2001),
            ControlCommand::Level {
                level: 128,
                transition_ds: 10,
            },
            None,
        )
        .unwrap();
    let level = engine
        .read_state(
            ShortAddr(0x2001),
            Some(1),
            cluster_id::LEVEL_CONTROL,
            attr_id::CURRENT_LEVEL,
            false,
        )
        .unwrap()
        .unwrap();
    assert_eq!(level.value, AttrValue::Int(128));

    let expected: Vec<(ShortAddr, u8, u16, u8, Vec<u8>)> = vec![
        (ShortAddr(0x2001), 1, cluster_id::ON_OFF, 0x01, vec![]),
        (ShortAddr(0x2001), 1, cluster_id::ON_OFF, 0x02, vec![]),
        (ShortAddr(0x2001), 1, cluster_id::LEVEL_CONTROL, 0x04, vec![128, 10, 0]),
    ];
    assert_eq!(radio.state().commands, expected);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_without_known_state_leaves_cache_alone() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x2001, light(0x01)).await;

    engine
        .control(ShortAddr(0x2001), ControlCommand::Toggle, None)
        .unwrap();
    assert_eq!(cached_on_off(&engine, 0x2001, Some(1)), None);
    assert_eq!(radio.state().commands.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attribute_setters_write_and_cache() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    let device = MockDevice::new(0x09)
        .endpoint(1, 0x0301, &[cluster_id::THERMOSTAT])
        .endpoint(2, 0x010D, &[cluster_id::ON_OFF, cluster_id::COLOR_CONTROL]);
    add(&mut engine, &radio, 0x2009, device).await;

    let endpoint = engine
        .control(ShortAddr(0x2009), ControlCommand::HeatingSetpoint { centidegrees: 2150 }, None)
        .unwrap();
    assert_eq!(endpoint, 1);
    let setpoint = engine
        .read_state(
            ShortAddr(0x2009),
            Some(1),
            cluster_id::THERMOSTAT,
            attr_id::THERMOSTAT_OCCUPIED_HEATING_SETPOINT,
            false,
        )
        .unwrap()
        .unwrap();
    assert_eq!(setpoint.value, AttrValue::Int(2150));
    assert_eq!(setpoint.meta.source, StateSource::Control);
    assert!(!setpoint.meta.authoritative);

    let writes: Vec<_> = radio
        .state()
        .writes
        .iter()
        .filter(|w| w.2 == cluster_id::THERMOSTAT)
        .cloned()
        .collect();
    assert_eq!(
        writes,
        vec![(
            ShortAddr(0x2009),
            1,
            cluster_id::THERMOSTAT,
            attr_id::THERMOSTAT_OCCUPIED_HEATING_SETPOINT,
            0x29,
            AttrValue::Int(2150)
        )]
    );

    engine
        .control(
            ShortAddr(0x2009),
            ControlCommand::ColorTemperature {
                mireds: 370,
                transition_ds: 0,
            },
            None,
        )
        .unwrap();
    let mireds = engine
        .read_state(
            ShortAddr(0x2009),
            Some(2),
            cluster_id::COLOR_CONTROL,
            attr_id::COLOR_TEMPERATURE_MIREDS,
            false,
        )
        .unwrap()
        .unwrap();
    assert_eq!(mireds.value, AttrValue::Int(370));
    let command = radio.state().commands.last().cloned().unwrap();
    assert_eq!(
        command,
        (ShortAddr(0x2009), 2, cluster_id::COLOR_CONTROL, 0x0A, vec![0x72, 0x01, 0, 0])
    );
}

#[tokio::test(start_paused = true)]
async fn test_control_needs_the_feature() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x2001, light(0x01)).await;

    let err = engine
        .control(ShortAddr(0x2001), ControlCommand::Lock, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
    assert!(radio.state().commands.is_empty());
}

// ── Feature endpoints ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_feature_endpoints_follow_cluster_layout() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    let sensor_light = MockDevice::new(0x04)
        .endpoint(1, 0x0100, &[cluster_id::ON_OFF, cluster_id::LEVEL_CONTROL])
        .endpoint(2, 0x0302, &[cluster_id::TEMPERATURE_MEASUREMENT]);
    add(&mut engine, &radio, 0x2004, sensor_light).await;
    let short = ShortAddr(0x2004);

    assert_eq!(engine.feature_endpoints(short, Feature::OnOff).unwrap(), vec![1]);
    assert_eq!(engine.feature_endpoints(short, Feature::Level).unwrap(), vec![1]);
    assert_eq!(engine.feature_endpoints(short, Feature::Temperature).unwrap(), vec![2]);
    assert!(engine.feature_endpoints(short, Feature::Lock).unwrap().is_empty());
    assert_eq!(engine.select_feature_endpoint(short, Feature::Temperature, None).unwrap(), 2);
    assert!(matches!(
        engine.select_feature_endpoint(short, Feature::Lock, None),
        Err(EngineError::NotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_multi_endpoint_feature_needs_selector() {
    let radio = MockRadio::new();
    let (mut engine, _clock) = engine_with(&radio, EngineConfig::default());
    let power_strip = MockDevice::new(0x05)
        .endpoint(10, 0x0009, &[cluster_id::ON_OFF])
        .endpoint(11, 0x0009, &[cluster_id::ON_OFF]);
    add(&mut engine, &radio, 0x2005, power_strip).await;
    let short = ShortAddr(0x2005);

    match engine.select_feature_endpoint(short, Feature::OnOff, None) {
        Err(EngineError::Ambiguous { candidates, .. }) => assert_eq!(candidates, vec![10, 11]),
        other => panic!("expected ambiguity, got {other:?}"),
    }
    assert_eq!(engine.select_feature_endpoint(short, Feature::OnOff, Some(11)).unwrap(), 11);
    assert_eq!(engine.select_feature_endpoint(short, Feature::OnOff, Some(2)).unwrap(), 11);
    assert!(matches!(
        engine.select_feature_endpoint(short, Feature::OnOff, Some(3)),
        Err(EngineError::InvalidRange { .. })
    ));

    assert_eq!(engine.control(short, ControlCommand::Off, Some(1)).unwrap(), 10);

    // Endpoint 11 is not the default, so the aggregate view stays empty.
    engine.control(short, ControlCommand::On, Some(11)).unwrap();
    assert_eq!(cached_on_off(&engine, 0x2005, Some(11)), Some(AttrValue::Bool(true)));
    assert_eq!(cached_on_off(&engine, 0x2005, None), Some(AttrValue::Bool(false)));
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_devices_age_out_and_come_back() {
    let radio = MockRadio::new();
    let config = EngineConfig {
        offline_after: ms(60_000),
        ..EngineConfig::default()
    };
    let (mut engine, clock) = engine_with(&radio, config);
    add(&mut engine, &radio, 0x2001, light(0x01)).await;
    let short = ShortAddr(0x2001);

    assert!(engine.device_status(short).unwrap().online);
    clock.advance(ms(61_000));
    let status = engine.device_status(short).unwrap();
    assert!(!status.online);
    assert_eq!(status.last_seen_age_ms, 61_000);
    assert!(engine.get_device(short, true).is_none());
    assert!(engine.list_devices(true).is_empty());
    assert_eq!(engine.list_devices(false).len(), 1);

    engine.handle_event(on_off_report(Some(0x2001), 1, true, 0)).await;
    let status = engine.device_status(short).unwrap();
    assert!(status.online);
    assert_eq!(status.last_seen_source.as_deref(), Some("attribute"));
}

#[tokio::test(start_paused = true)]
async fn test_forced_offline_until_marked_online() {
    let radio = MockRadio::new();
    let (mut engine, clock) = engine_with(&radio, EngineConfig::default());
    add(&mut engine, &radio, 0x2001, light(0x01)).await;
    let short = ShortAddr(0x2001);

    clock.advance(ms(5_000));
    engine.mark_device_offline(short, "left network").unwrap();
    let status = engine.device_status(short).unwrap();
    assert!(!status.online);
    assert!(status.forced_offline);
    assert_eq!(status.offline_reason.as_deref(), Some("left network"));
    assert_eq!(status.offline_set_at, Some(common::epoch() + chrono::TimeDelta::seconds(5)));

    engine.mark_device_online(short, "manual").unwrap();
    let status = engine.device_status(short).unwrap();
    assert!(status.online);
    assert!(!status.forced_offline);
    assert_eq!(status.last_seen_source.as_deref(), Some("manual"));

    assert!(matches!(
        engine.mark_device_offline(ShortAddr(0x4444), "gone"),
        Err(EngineError::NotFound { .. })
    ));
}
