mod common;

use common::*;
use fslibre_decoder::{Decoder, DecoderConfig, OpCode, PacketDump, RawPacket, RecordKind};

fn session() -> Vec<RawPacket> {
    vec![
        config(TIME_CONVERSION),
        date_time(),
        history(10, 600, 100),
        history(11, 1500, 110),
        // Clock moved forward one hour
        time_change(12, 2400 + 3600, 2400),
        history(13, 6300, 120),
        measurement(14, 6400, 95, false),
        measurement(15, 6500, 36, true),
        compressed(HISTORY_TABLE, &history_record(16, 7000, 130, false)),
    ]
}

#[test]
fn decode_full_session() {
    let _ = env_logger::builder().is_test(true).try_init();

    let decoder = Decoder::default();
    let report = decoder.decode_session(&session(), 0x1_0000).unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(report.summary.containers_decompressed, 1);
    assert!(report.device_date_time.is_some());

    let types: Vec<_> = report.records.iter().map(|r| r.kind.type_name()).collect();
    assert_eq!(
        types,
        vec!["deviceEvent", "cbg", "cbg", "cbg", "cbg", "smbg", "bloodKetone"]
    );

    let before = report.records.iter().find(|r| r.index == 10).unwrap();
    assert_eq!(before.device_time, "2024-01-01T00:10:00");
    assert_eq!(before.timezone_offset, -60);
    assert_eq!(before.time, "2024-01-01T01:10:00.000Z");

    let after = report.records.iter().find(|r| r.index == 13).unwrap();
    assert_eq!(after.timezone_offset, 0);
    assert_eq!(after.time, "2024-01-01T01:45:00.000Z");

    match &report.records[0].kind {
        RecordKind::DeviceEvent { change, .. } => {
            assert_eq!(change.from, "2024-01-01T00:40:00");
            assert_eq!(change.to, "2024-01-01T01:40:00");
            assert_eq!(change.agent, "manual");
        }
        other => panic!("expected time change, got {:?}", other),
    }
}

#[test]
fn order_of_packets_does_not_matter() {
    let decoder = Decoder::new(DecoderConfig::new().with_timezone("Europe/Berlin")).unwrap();
    let packets = session();
    let expected = decoder.decode(&packets, 0x1_0000).unwrap();
    assert_eq!(expected.len(), 7);

    let mut reversed = packets.clone();
    reversed.reverse();
    assert_eq!(decoder.decode(&reversed, 0x1_0000).unwrap(), expected);

    for shift in 1..packets.len() {
        let mut rotated = packets.clone();
        rotated.rotate_left(shift);
        assert_eq!(
            decoder.decode(&rotated, 0x1_0000).unwrap(),
            expected,
            "rotation {}",
            shift
        );
    }
}

#[test]
fn tied_record_numbers_from_two_tables() {
    let decoder = Decoder::default();
    let forward = vec![
        config(TIME_CONVERSION),
        time_change_in(GLUCOSE_TABLE, 5, 2400 + 3600, 2400),
        time_change_in(EVENT_TABLE, 5, 2400 + 7200, 2400),
        history(6, 9700, 100),
    ];
    let mut swapped = forward.clone();
    swapped.swap(1, 2);

    let expected = decoder.decode(&forward, 0x1_0000).unwrap();
    let changes = expected
        .iter()
        .filter(|r| matches!(r.kind, RecordKind::DeviceEvent { .. }))
        .count();
    assert_eq!(changes, 2);
    assert_eq!(decoder.decode(&swapped, 0x1_0000).unwrap(), expected);
}

#[test]
fn oversized_container_is_reported_as_failure() {
    let decoder = Decoder::default();
    // Zero blocks of the largest encodable length
    let mut data = vec![HISTORY_TABLE];
    for _ in 0..4 {
        data.extend_from_slice(&[1, 0xFF, 0xFF, 0xFF]);
    }
    data.extend_from_slice(&[0; 4]);
    let container = RawPacket::new(OpCode::CompressedDatabase, data);

    let packets = vec![config(TIME_CONVERSION), container, history(21, 700, 101)];
    let report = decoder.decode_session(&packets, 0x1_0000).unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].op_code, OpCode::CompressedDatabase);
    assert_eq!(report.summary.containers_rejected, 1);
    assert_eq!(report.records.len(), 1);
}

#[test]
fn record_numbers_are_reconstructed() {
    let decoder = Decoder::default();
    let packets = vec![
        config(TIME_CONVERSION),
        history(0xFFFE, 600, 100),
        history(0x0000, 1200, 100),
    ];

    // Header 0x0000 maps to 0x20000 - 0x10000
    let records = decoder.decode(&packets, 0x2_0000).unwrap();
    let indices: Vec<_> = records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0x1_0000, 0x1_FFFE]);
}

#[test]
fn wrap_marker_raises_boundary_for_following_records() {
    let decoder = Decoder::default();
    let packets = vec![
        config(TIME_CONVERSION),
        history_wrap(0x2_0003),
        history(0x0002, 600, 100),
    ];

    let report = decoder.decode_session(&packets, 0x1_0000).unwrap();
    assert_eq!(report.summary.wrap_markers, 1);
    assert_eq!(report.records[0].index, 0x2_0002);
}

#[test]
fn corrupted_container_is_dropped() {
    let decoder = Decoder::default();
    let mut container = compressed(HISTORY_TABLE, &history_record(20, 600, 100, false));
    let last = container.data.len() - 1;
    container.data[last] ^= 0x55;

    let packets = vec![config(TIME_CONVERSION), container, history(21, 700, 101)];
    let report = decoder.decode_session(&packets, 0x1_0000).unwrap();

    assert_eq!(report.summary.containers_rejected, 1);
    assert!(report.failures.is_empty());
    let indices: Vec<_> = report.records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![21]);
}

#[test]
fn unknown_block_type_fails_only_its_container() {
    let decoder = Decoder::default();
    let mut container = compressed(HISTORY_TABLE, &history_record(20, 600, 100, false));
    container.data[1] = 0x07;

    let packets = vec![config(TIME_CONVERSION), container, history(21, 700, 101)];
    let report = decoder.decode_session(&packets, 0x1_0000).unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].op_code, OpCode::CompressedDatabase);
    assert_eq!(report.records.len(), 1);
}

#[test]
fn database_without_factory_config() {
    let packets = vec![history(1, 600, 100), history(2, 1200, 100)];

    let ctx = Decoder::default().decode_records(&packets, 0x1_0000);
    assert_eq!(ctx.records.len(), 2);
    assert!(ctx.records.iter().all(|r| r.device_time.is_none()));

    let records = Decoder::default().decode(&packets, 0x1_0000).unwrap();
    assert!(records.is_empty());
}

#[test]
fn out_of_range_values_are_annotated() {
    let decoder = Decoder::default();
    let packets = vec![
        config(TIME_CONVERSION),
        history(1, 600, 12),
        measurement(2, 700, 600, false),
    ];

    let records = decoder.decode(&packets, 0x1_0000).unwrap();
    let json = serde_json::to_value(&records).unwrap();

    assert_eq!(json[0]["type"], "cbg");
    assert_eq!(json[0]["value"], 20.0);
    assert_eq!(json[0]["annotations"][0]["code"], "bg/out-of-range");
    assert_eq!(json[0]["annotations"][0]["value"], "low");
    assert_eq!(json[0]["annotations"][0]["threshold"], 21.0);

    assert_eq!(json[1]["type"], "smbg");
    assert_eq!(json[1]["value"], 500.0);
    assert_eq!(json[1]["annotations"][0]["value"], "high");
}

#[test]
fn duplicate_time_change_from_second_table() {
    let decoder = Decoder::default();
    let mut packets = session();
    // Same clock change reported again by the glucose table
    let duplicate = time_change(17, 2400 + 3600, 2400);
    let mut data = duplicate.data.clone();
    data[0] = GLUCOSE_TABLE;
    packets.push(RawPacket::new(OpCode::GetDatabase, data));

    let records = decoder.decode(&packets, 0x1_0000).unwrap();
    let changes = records
        .iter()
        .filter(|r| matches!(r.kind, RecordKind::DeviceEvent { .. }))
        .count();
    assert_eq!(changes, 1);
}

#[test]
fn decode_json_dump() {
    let dump = PacketDump::new(session(), 0x1_0000);
    let json = serde_json::to_string(&dump).unwrap();

    let parsed = PacketDump::from_reader(json.as_bytes()).unwrap();
    let report = Decoder::default().decode_dump(&parsed).unwrap();
    assert_eq!(report.records.len(), 7);
}
