#![allow(dead_code)]

use std::sync::Arc;

use hub_sim::SimHub;
use sensorhub::{HubConfig, SensorHub};

pub fn init_log() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

/// Probed but not yet initialized hub.
pub fn probed() -> (Arc<SensorHub>, SimHub) {
    probed_with(HubConfig::default())
}

pub fn probed_with(config: HubConfig) -> (Arc<SensorHub>, SimHub) {
    init_log();
    let sim = SimHub::new();
    let hub = SensorHub::probe(sim.clone(), sim.clone(), sim.clone(), config);
    (hub, sim)
}

/// Hub running firmware in normal mode, board log cleared.
pub fn running() -> (Arc<SensorHub>, SimHub) {
    let (hub, sim) = probed();
    hub.initialize().unwrap();
    sim.clear_log();
    (hub, sim)
}
