//! End-to-end metering scenarios
//!
//! Each test configures meters the way the control plane would, sends one
//! packet through the packet path and checks the raw map value byte for
//! byte, lock word included.

use pretty_assertions::assert_eq;
use psabpf_meter::{
    hexdump, Color, ConfigPort, CounterKind, DirectMeterRef, DirectMeterTable, EntryLayout,
    IndirectMeterStore, MeterParams, MeterUnit, RateEncoder, TokenBucketPair, METER_RECORD_LEN,
};

const PACKET_LEN: u32 = 100;
const TABLE_KEY: [u8; 4] = [0x04, 0x00, 0x00, 0x00];

fn hex(text: &str) -> Vec<u8> {
    hexdump::parse(text).expect("valid hex in test fixture")
}

/// 10 Mb/s: 1 ms period, 1250 B per period, 6250 B bursts, buckets full.
const DIRECT_METER_FULL: &str = "\
    40 42 0F 00 00 00 00 00 E2 04 00 00 00 00 00 00 \
    40 42 0F 00 00 00 00 00 E2 04 00 00 00 00 00 00 \
    6A 18 00 00 00 00 00 00 6A 18 00 00 00 00 00 00 \
    6A 18 00 00 00 00 00 00 6A 18 00 00 00 00 00 00 \
    00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 \
    00 00 00 00 00 00 00 00";

/// Same meter after one 100 B packet: 6150 B left in each bucket.
const DIRECT_METER_AFTER_ONE: &str = "\
    40 42 0F 00 00 00 00 00 E2 04 00 00 00 00 00 00 \
    40 42 0F 00 00 00 00 00 E2 04 00 00 00 00 00 00 \
    6A 18 00 00 00 00 00 00 6A 18 00 00 00 00 00 00 \
    06 18 00 00 00 00 00 00 06 18 00 00 00 00 00 00 \
    00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 \
    00 00 00 00 00 00 00 00";

/// Action id 1, egress port 5.
const ACTION_FWD_PORT5: &str = "01 00 00 00 05 00 00 00";

fn indirect(unit: MeterUnit) -> IndirectMeterStore {
    IndirectMeterStore::new("ingress_meter1", 1, unit, RateEncoder::default())
}

fn direct_table(counter: Option<CounterKind>, meters: usize) -> DirectMeterTable {
    DirectMeterTable::new(
        "ingress_tbl_fwd",
        EntryLayout {
            action_data_len: 4,
            counter,
            meters,
        },
        MeterUnit::Bytes,
        RateEncoder::default(),
    )
}

#[test]
fn test_indirect_bytes_meter() {
    // 2 Mb/s -> 250000 B/s, 10 ms burst -> 2500 B.
    let store = indirect(MeterUnit::Bytes);
    store
        .set_rates(&0, &MeterParams::new(250_000, 2500, 250_000, 2500))
        .unwrap();

    assert_eq!(store.execute(0, PACKET_LEN, 0).unwrap(), Color::Green);

    let expected = hex(
        "A0 0F 00 00 00 00 00 00 01 00 00 00 00 00 00 00 \
         A0 0F 00 00 00 00 00 00 01 00 00 00 00 00 00 00 \
         C4 09 00 00 00 00 00 00 C4 09 00 00 00 00 00 00 \
         60 09 00 00 00 00 00 00 60 09 00 00 00 00 00 00 \
         00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 \
         00 00 00 00 00 00 00 00",
    );
    assert_eq!(store.read_value(&hex("00 00 00 00")).unwrap().to_vec(), expected);
}

#[test]
fn test_indirect_bytes_meter_10mbps() {
    // 10 Mb/s -> 1.25 MB/s, 10 ms burst -> 6250 B, 800 ns period.
    let store = indirect(MeterUnit::Bytes);
    store
        .set_rates(&0, &MeterParams::new(1_250_000, 6250, 1_250_000, 6250))
        .unwrap();
    store.execute(0, PACKET_LEN, 0).unwrap();

    let record = store.read(&0).unwrap();
    assert_eq!(
        record,
        TokenBucketPair {
            pir_period: 800,
            pir_unit_per_period: 1,
            cir_period: 800,
            cir_unit_per_period: 1,
            pbs: 6250,
            cbs: 6250,
            pbs_left: 6150,
            cbs_left: 6150,
            time_p: 0,
            time_c: 0,
        }
    );
}

#[test]
fn test_indirect_packets_meter() {
    let store = indirect(MeterUnit::Packets);
    store
        .set_rates(&0, &MeterParams::new(100, 10, 100, 10))
        .unwrap();
    assert_eq!(store.execute(0, PACKET_LEN, 0).unwrap(), Color::Green);

    let expected = hex(
        "80 96 98 00 00 00 00 00 01 00 00 00 00 00 00 00 \
         80 96 98 00 00 00 00 00 01 00 00 00 00 00 00 00 \
         0A 00 00 00 00 00 00 00 0A 00 00 00 00 00 00 00 \
         09 00 00 00 00 00 00 00 09 00 00 00 00 00 00 00 \
         00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 \
         00 00 00 00 00 00 00 00",
    );
    assert_eq!(store.read_value(&[0, 0, 0, 0]).unwrap().to_vec(), expected);
}

#[test]
fn test_direct_meter() {
    let table = direct_table(None, 1);
    let value = hex(&format!("{} {}", ACTION_FWD_PORT5, DIRECT_METER_FULL));
    table.update_entry(&TABLE_KEY, &value).unwrap();

    let hit = table.hit(&TABLE_KEY, PACKET_LEN, 0).unwrap();
    assert_eq!(hit.action.action_id, 1);
    assert_eq!(hit.action.data, vec![5, 0, 0, 0]);
    assert_eq!(hit.colors, vec![Color::Green]);

    let expected = hex(&format!("{} {}", ACTION_FWD_PORT5, DIRECT_METER_AFTER_ONE));
    assert_eq!(table.entry_value(&TABLE_KEY).unwrap(), expected);
}

#[test]
fn test_direct_and_indirect_meters() {
    let table = direct_table(None, 1);
    table
        .update_entry(
            &TABLE_KEY,
            &hex(&format!("{} {}", ACTION_FWD_PORT5, DIRECT_METER_FULL)),
        )
        .unwrap();
    let store = IndirectMeterStore::new(
        "ingress_indirect_meter",
        1,
        MeterUnit::Bytes,
        RateEncoder::default(),
    );
    store
        .write_value(&[0, 0, 0, 0], &hex(DIRECT_METER_FULL))
        .unwrap();

    // The action runs both meters on the same packet.
    let hit = table.hit(&TABLE_KEY, PACKET_LEN, 0).unwrap();
    let indirect_color = store.execute(0, PACKET_LEN, 0).unwrap();
    assert_eq!(hit.colors, vec![Color::Green]);
    assert_eq!(indirect_color, Color::Green);

    assert_eq!(
        table.entry_value(&TABLE_KEY).unwrap(),
        hex(&format!("{} {}", ACTION_FWD_PORT5, DIRECT_METER_AFTER_ONE))
    );
    assert_eq!(
        store.read_value(&[0, 0, 0, 0]).unwrap().to_vec(),
        hex(DIRECT_METER_AFTER_ONE)
    );
}

#[test]
fn test_two_direct_meters() {
    let table = direct_table(None, 2);
    table
        .update_entry(
            &TABLE_KEY,
            &hex(&format!(
                "{} {} {}",
                ACTION_FWD_PORT5, DIRECT_METER_FULL, DIRECT_METER_FULL
            )),
        )
        .unwrap();

    let hit = table.hit(&TABLE_KEY, PACKET_LEN, 0).unwrap();
    assert_eq!(hit.colors, vec![Color::Green, Color::Green]);

    assert_eq!(
        table.entry_value(&TABLE_KEY).unwrap(),
        hex(&format!(
            "{} {} {}",
            ACTION_FWD_PORT5, DIRECT_METER_AFTER_ONE, DIRECT_METER_AFTER_ONE
        ))
    );
}

#[test]
fn test_direct_meter_with_counter() {
    let table = direct_table(Some(CounterKind::Packets), 1);
    table
        .update_entry(
            &TABLE_KEY,
            &hex(&format!(
                "{} 00 00 00 00 00 00 00 00 {}",
                ACTION_FWD_PORT5, DIRECT_METER_FULL
            )),
        )
        .unwrap();

    table.hit(&TABLE_KEY, PACKET_LEN, 0).unwrap();

    assert_eq!(
        table.entry_value(&TABLE_KEY).unwrap(),
        hex(&format!(
            "{} 01 00 00 00 00 00 00 00 {}",
            ACTION_FWD_PORT5, DIRECT_METER_AFTER_ONE
        ))
    );
}

#[test]
fn test_two_meter_isolation() {
    let table = direct_table(Some(CounterKind::PacketsAndBytes), 2);
    let layout = *table.layout();
    let mut value = vec![0u8; layout.value_len()];
    value[..8].copy_from_slice(&hex(ACTION_FWD_PORT5));
    value[layout.meter_range(1)].copy_from_slice(&hex(DIRECT_METER_FULL));
    table.update_entry(&TABLE_KEY, &value).unwrap();

    let meter_b = table.entry_value(&TABLE_KEY).unwrap()[layout.meter_range(1)].to_vec();

    let meter_a = DirectMeterRef::new(TABLE_KEY, 0);
    table
        .set_rates(&meter_a, &MeterParams::new(125_000, 1500, 62_500, 1000))
        .unwrap();
    for t in 0..50u64 {
        table.execute(&meter_a, 64, t * 1000).unwrap();
    }
    let a = table.read(&meter_a).unwrap();
    assert!(a.pbs_left < 1500);
    table.reset(&meter_a).unwrap();

    let after = table.entry_value(&TABLE_KEY).unwrap();
    assert_eq!(after[layout.meter_range(1)].to_vec(), meter_b);
    assert_eq!(after[..8].to_vec(), hex(ACTION_FWD_PORT5));
    assert_eq!(after[layout.meter_range(1)].len(), METER_RECORD_LEN);
}

#[test]
fn test_reconfiguration_resets_tokens_and_timestamps() {
    let store = indirect(MeterUnit::Bytes);
    let params = MeterParams::new(250_000, 2500, 125_000, 2000);
    store.set_rates(&0, &params).unwrap();
    for t in 0..10u64 {
        store.execute(0, 500, 1_000_000 + t * 4000).unwrap();
    }
    let drained = store.read(&0).unwrap();
    assert!(drained.pbs_left < drained.pbs);
    assert!(drained.time_p > 0);

    store.set_rates(&0, &params).unwrap();
    let record = store.read(&0).unwrap();
    assert_eq!(record.pbs_left, record.pbs);
    assert_eq!(record.cbs_left, record.cbs);
    assert_eq!((record.time_p, record.time_c), (0, 0));
}

#[test]
fn test_rate_conformance_and_recovery() {
    // 100 B/s: one byte every 10 ms.
    let store = indirect(MeterUnit::Bytes);
    store
        .set_rates(&0, &MeterParams::new(100, 300, 100, 300))
        .unwrap();

    for _ in 0..3 {
        assert_eq!(store.execute(0, PACKET_LEN, 0).unwrap(), Color::Green);
    }
    assert_eq!(store.execute(0, PACKET_LEN, 0).unwrap(), Color::Red);

    // 99 bytes of credit are not enough for a 100 byte packet.
    assert_eq!(
        store.execute(0, PACKET_LEN, 990_000_000).unwrap(),
        Color::Red
    );
    assert_eq!(
        store.execute(0, PACKET_LEN, 1_000_000_000).unwrap(),
        Color::Green
    );
}

#[test]
fn test_yellow_between_committed_and_peak() {
    let store = indirect(MeterUnit::Bytes);
    store
        .set_rates(&0, &MeterParams::new(0, 300, 0, 100))
        .unwrap();

    let colors: Vec<Color> = (0..4)
        .map(|_| store.execute(0, PACKET_LEN, 0).unwrap())
        .collect();
    assert_eq!(
        colors,
        vec![Color::Green, Color::Yellow, Color::Yellow, Color::Red]
    );
    let record = store.read(&0).unwrap();
    assert_eq!((record.pbs_left, record.cbs_left), (0, 0));
}
