use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use sensorhub::{
    DispatchOutcome, HubError, Irq, IrqEvent, IrqMask, Mode, PANIC_BANK, PanicOutcome, Reg,
};
use spin::Mutex;

mod common;

fn handoffs(sim: &hub_sim::SimHub) -> usize {
    sim.frames().iter().filter(|f| f[0] == PANIC_BANK).count()
}

#[test]
fn second_registration_is_rejected() {
    let (hub, _sim) = common::running();
    hub.irq_register(Irq::AccelDataReady, |_: &IrqEvent<'_>| {})
        .unwrap();
    let err = hub
        .irq_register(Irq::AccelDataReady, |_: &IrqEvent<'_>| {})
        .unwrap_err();
    assert!(matches!(err, HubError::AlreadyRegistered(Irq::AccelDataReady)));

    hub.irq_unregister(Irq::AccelDataReady);
    hub.irq_register(Irq::AccelDataReady, |_: &IrqEvent<'_>| {})
        .unwrap();
}

#[test]
fn pending_event_reaches_its_handler_once() {
    let (hub, sim) = common::running();
    let hub_addr = Arc::as_ptr(&hub) as usize;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = seen.clone();
    hub.irq_register(Irq::AccelDataReady, move |event: &IrqEvent<'_>| {
        let data = event.hub.read(Reg::AccelX).unwrap();
        log.lock()
            .push((event.irq, event.hub as *const _ as usize, data));
    })
    .unwrap();
    let alarms = Arc::new(AtomicUsize::new(0));
    let count = alarms.clone();
    hub.irq_register(Irq::ApAlarmExpired, move |_: &IrqEvent<'_>| {
        count.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    sim.set_register(Reg::AccelX, &[1, 2, 3, 4]);
    sim.raise(Irq::AccelDataReady);
    assert_eq!(hub.handle_interrupt().unwrap(), DispatchOutcome::Dispatched(1));
    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (Irq::AccelDataReady, hub_addr, vec![1, 2, 3, 4]));
    }
    assert_eq!(alarms.load(Ordering::SeqCst), 0);

    sim.raise(Irq::AccelDataReady);
    sim.raise(Irq::ApAlarmExpired);
    assert_eq!(hub.handle_interrupt().unwrap(), DispatchOutcome::Dispatched(2));
    assert_eq!(seen.lock().len(), 2);
    assert_eq!(alarms.load(Ordering::SeqCst), 1);
    assert_eq!(handoffs(&sim), 0);
}

#[test]
fn unexplained_interrupt_checks_for_panic_once() {
    let (hub, sim) = common::running();
    sim.raise(Irq::GyroDataReady);

    let outcome = hub.handle_interrupt().unwrap();
    assert_eq!(outcome, DispatchOutcome::PanicCheck(PanicOutcome::NotConfirmed));
    assert_eq!(handoffs(&sim), 1);

    // false alarm: nothing was reset or reloaded
    assert_eq!(sim.resets(), 0);
    assert_eq!(sim.firmware_loads(), 0);
    assert_eq!(hub.mode(), Mode::Normal);

    let unknown = IrqMask::from_bits_retain(1 << 12);
    assert_eq!(
        hub.dispatch_all(unknown),
        DispatchOutcome::PanicCheck(PanicOutcome::NotConfirmed)
    );
    assert_eq!(handoffs(&sim), 2);
}

#[test]
fn enable_state_is_written_with_the_event_bit_as_mask() {
    let (hub, sim) = common::running();
    hub.irq_enable(Irq::AccelDataReady).unwrap();
    hub.irq_enable(Irq::GyroDataReady).unwrap();
    hub.irq_enable(Irq::ApAlarmExpired).unwrap();
    assert_eq!(sim.register(Reg::GeneralInterrupt0Enable), [0b11]);
    assert_eq!(sim.register(Reg::GeneralInterrupt1Enable), [0b1]);

    hub.irq_disable(Irq::AccelDataReady).unwrap();
    assert_eq!(sim.register(Reg::GeneralInterrupt0Enable), [0b10]);
    assert!(!hub.irq_is_enabled(Irq::AccelDataReady));
    assert!(hub.irq_is_enabled(Irq::GyroDataReady));
    assert_eq!(
        hub.irq_table().enabled_mask(),
        IrqMask::GYRO_DATA_READY | IrqMask::AP_ALARM_EXPIRED
    );
}

#[test]
fn enabling_twice_leaves_the_hub_unchanged() {
    let (hub, sim) = common::running();
    hub.irq_enable(Irq::CompassDataReady).unwrap();
    let once = sim.register(Reg::GeneralInterrupt0Enable);
    hub.irq_enable(Irq::CompassDataReady).unwrap();
    assert_eq!(sim.register(Reg::GeneralInterrupt0Enable), once);
    assert!(hub.irq_is_enabled(Irq::CompassDataReady));
    assert_eq!(hub.irq_table().enabled_mask(), IrqMask::COMPASS_DATA_READY);
}

#[test]
fn enable_table_matches_hub_under_contention() {
    let (hub, sim) = common::running();
    sim.set_transfer_delay(Duration::from_micros(50));

    let mut workers = Vec::new();
    for (n, irq) in [Irq::AccelDataReady, Irq::AccelDataReady, Irq::GyroDataReady]
        .into_iter()
        .enumerate()
    {
        let hub = hub.clone();
        workers.push(thread::spawn(move || {
            for i in 0..200 {
                if (i + n) % 2 == 0 {
                    hub.irq_enable(irq).unwrap();
                } else {
                    hub.irq_disable(irq).unwrap();
                }
            }
        }));
    }
    // the post-recovery rewrite races the clients
    let restorer = {
        let hub = hub.clone();
        thread::spawn(move || {
            for _ in 0..100 {
                hub.irq_table().restore(hub.broker()).unwrap();
            }
        })
    };
    for w in workers {
        w.join().unwrap();
    }
    restorer.join().unwrap();

    let mask = hub.irq_table().enabled_mask();
    assert_eq!(sim.register(Reg::GeneralInterrupt0Enable), [mask.register_byte(0)]);
    assert_eq!(sim.register(Reg::GeneralInterrupt1Enable), [mask.register_byte(1)]);
    assert_eq!(sim.overlaps(), 0);
}

#[test]
fn status_read_fault_goes_to_panic_check() {
    // a NACK from a panicked hub leads to recovery
    let (hub, sim) = common::running();
    sim.trigger_panic();
    sim.inject_nacks(1);
    assert_eq!(
        hub.handle_interrupt().unwrap(),
        DispatchOutcome::PanicCheck(PanicOutcome::Recovered)
    );
    assert_eq!(handoffs(&sim), 1);
    assert_eq!(sim.firmware_loads(), 1);

    // a short status read from a healthy hub is a false alarm
    let (hub, sim) = common::running();
    sim.inject_short_transfers(1);
    assert_eq!(
        hub.handle_interrupt().unwrap(),
        DispatchOutcome::PanicCheck(PanicOutcome::NotConfirmed)
    );
    assert_eq!(handoffs(&sim), 1);
    assert_eq!(sim.firmware_loads(), 0);
    assert_eq!(hub.mode(), Mode::Normal);
}

#[test]
fn unregister_waits_for_running_handler() {
    let (hub, sim) = common::running();
    let entered = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));

    let (e, f) = (entered.clone(), finished.clone());
    hub.irq_register(Irq::PedometerDataReady, move |_: &IrqEvent<'_>| {
        e.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        f.store(true, Ordering::SeqCst);
    })
    .unwrap();

    sim.raise(Irq::PedometerDataReady);
    let worker = {
        let hub = hub.clone();
        thread::spawn(move || hub.handle_interrupt().unwrap())
    };
    while !entered.load(Ordering::SeqCst) {
        thread::yield_now();
    }

    hub.irq_unregister(Irq::PedometerDataReady);
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(worker.join().unwrap(), DispatchOutcome::Dispatched(1));

    sim.raise(Irq::PedometerDataReady);
    assert!(matches!(
        hub.handle_interrupt().unwrap(),
        DispatchOutcome::PanicCheck(_)
    ));
}

#[test]
fn handler_can_remove_itself() {
    let (hub, sim) = common::running();
    let calls = Arc::new(AtomicUsize::new(0));
    let count = calls.clone();
    hub.irq_register(Irq::ActivityChange, move |event: &IrqEvent<'_>| {
        count.fetch_add(1, Ordering::SeqCst);
        event.unregister_self();
    })
    .unwrap();

    sim.raise(Irq::ActivityChange);
    assert_eq!(hub.handle_interrupt().unwrap(), DispatchOutcome::Dispatched(1));
    assert!(!hub.irq_table().is_registered(Irq::ActivityChange));

    sim.raise(Irq::ActivityChange);
    hub.handle_interrupt().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn interrupt_before_bring_up_is_refused() {
    let (hub, sim) = common::probed();
    let err = hub.handle_interrupt().unwrap_err();
    assert!(matches!(err, HubError::NotInitialized));
    assert_eq!(sim.transfers(), 0);
}

#[test]
fn worker_drains_queued_interrupts() {
    let (hub, sim) = common::running();
    let calls = Arc::new(AtomicUsize::new(0));
    let count = calls.clone();
    hub.irq_register(Irq::LightSensorDataReady, move |_: &IrqEvent<'_>| {
        count.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    let worker = {
        let hub = hub.clone();
        thread::spawn(move || {
            spin_on::spin_on(hub.irq_work().wait());
            hub.process_work()
        })
    };

    sim.raise(Irq::LightSensorDataReady);
    hub.irq_work().raise();

    assert_eq!(worker.join().unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(hub.irq_work().is_empty());
}
