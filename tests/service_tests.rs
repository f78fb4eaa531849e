//! RelayService broadcast/visibility tests

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use cursor_relay::protocol::{flags, opcodes};
    use cursor_relay::service::{RelayService, TickOutput};
    use cursor_relay::types::ConnectionId;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// One decoded per-subject record from a 0xA4 frame.
    #[derive(Debug, PartialEq)]
    struct ParsedRecord {
        id: u32,
        flag: u8,
        pos: Option<(f32, f32)>,
        nickname: Option<String>,
        color: Option<[u8; 3]>,
    }

    fn read_u32(frame: &[u8], offset: &mut usize) -> u32 {
        let v = u32::from_le_bytes(frame[*offset..*offset + 4].try_into().unwrap());
        *offset += 4;
        v
    }

    fn read_f32(frame: &[u8], offset: &mut usize) -> f32 {
        let v = f32::from_le_bytes(frame[*offset..*offset + 4].try_into().unwrap());
        *offset += 4;
        v
    }

    fn parse_tick_frame(frame: &Bytes) -> Vec<ParsedRecord> {
        assert_eq!(frame[0], opcodes::SC_TICK, "not a tick frame");
        let mut records = Vec::new();
        let mut offset = 1;
        while offset < frame.len() {
            let id = read_u32(frame, &mut offset);
            let flag = frame[offset];
            offset += 1;
            let record = match flag {
                flags::INTRODUCE => ParsedRecord {
                    id,
                    flag,
                    pos: Some((read_f32(frame, &mut offset), read_f32(frame, &mut offset))),
                    nickname: None,
                    color: None,
                },
                flags::UPDATE | flags::REFRESH => {
                    let pos = (read_f32(frame, &mut offset), read_f32(frame, &mut offset));
                    let nul = frame[offset..]
                        .iter()
                        .position(|&b| b == 0)
                        .expect("unterminated nickname");
                    let nickname =
                        String::from_utf8(frame[offset..offset + nul].to_vec()).unwrap();
                    offset += nul + 1;
                    let color = [frame[offset], frame[offset + 1], frame[offset + 2]];
                    offset += 3;
                    ParsedRecord {
                        id,
                        flag,
                        pos: Some(pos),
                        nickname: Some(nickname),
                        color: Some(color),
                    }
                }
                flags::DELETE => ParsedRecord {
                    id,
                    flag,
                    pos: None,
                    nickname: None,
                    color: None,
                },
                other => panic!("unknown record flag {other:#04x}"),
            };
            records.push(record);
        }
        records
    }

    fn frame_for(output: &TickOutput, conn: ConnectionId) -> Vec<ParsedRecord> {
        let (_, frame) = output
            .frames
            .iter()
            .find(|(c, _)| *c == conn)
            .unwrap_or_else(|| panic!("no frame for connection {conn}"));
        parse_tick_frame(frame)
    }

    /// Connect and return the allocated cursor id from the hello frame.
    fn connect(svc: &mut RelayService, conn: ConnectionId, world: &str) -> u32 {
        let hello = svc.connect(conn, world).expect("connect refused");
        assert_eq!(hello[0], opcodes::SC_HELLO);
        u32::from_le_bytes(hello[1..5].try_into().unwrap())
    }

    fn viewport_msg(width: u32, height: u32) -> Vec<u8> {
        let mut frame = vec![opcodes::CS_VIEWPORT];
        frame.extend_from_slice(&width.to_le_bytes());
        frame.extend_from_slice(&height.to_le_bytes());
        frame
    }

    fn position_msg(x: u32, y: u32) -> Vec<u8> {
        let mut frame = vec![opcodes::CS_POSITION];
        frame.extend_from_slice(&x.to_le_bytes());
        frame.extend_from_slice(&y.to_le_bytes());
        frame
    }

    fn nickname_msg(nickname: &str) -> Vec<u8> {
        let mut frame = vec![opcodes::CS_NICKNAME];
        frame.extend_from_slice(nickname.as_bytes());
        frame
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn connect_allocates_distinct_ids() {
        let mut svc = RelayService::new();
        let a = connect(&mut svc, 1, "w1");
        let b = connect(&mut svc, 2, "w1");
        assert_ne!(a, b);
        assert_eq!(svc.connection_count(), 2);
    }

    #[test]
    fn duplicate_connection_is_refused() {
        let mut svc = RelayService::new();
        connect(&mut svc, 1, "w1");
        assert!(svc.connect(1, "w1").is_err());
    }

    // -----------------------------------------------------------------------
    // No self-pairing / world isolation
    // -----------------------------------------------------------------------

    #[test]
    fn no_record_for_self() {
        let mut svc = RelayService::new();
        connect(&mut svc, 1, "w1");
        let output = svc.tick();
        assert!(frame_for(&output, 1).is_empty());
    }

    #[test]
    fn different_worlds_never_cross() {
        let mut svc = RelayService::new();
        connect(&mut svc, 1, "w1");
        connect(&mut svc, 2, "w2");
        let output = svc.tick();
        assert!(frame_for(&output, 1).is_empty());
        assert!(frame_for(&output, 2).is_empty());
    }

    // -----------------------------------------------------------------------
    // Introduction and appearance delivery
    // -----------------------------------------------------------------------

    #[test]
    fn first_contact_is_a_bare_introduce() {
        let mut svc = RelayService::new();
        connect(&mut svc, 1, "w1");
        let b = connect(&mut svc, 2, "w1");

        let output = svc.tick();
        let records = frame_for(&output, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, b);
        assert_eq!(records[0].flag, flags::INTRODUCE);
        assert!(records[0].nickname.is_none());
        assert!(records[0].color.is_none());
    }

    #[test]
    fn every_record_after_introduction_carries_appearance() {
        let mut svc = RelayService::new();
        connect(&mut svc, 1, "w1");
        let b = connect(&mut svc, 2, "w1");

        svc.tick();
        for _ in 0..3 {
            let output = svc.tick();
            let records = frame_for(&output, 1);
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].id, b);
            assert_eq!(records[0].flag, flags::UPDATE);
            assert!(records[0].nickname.is_some());
            assert!(records[0].color.is_some());
        }
    }

    #[test]
    fn late_joiner_gets_introduce_while_others_get_updates() {
        let mut svc = RelayService::new();
        connect(&mut svc, 1, "w1");
        let b = connect(&mut svc, 2, "w1");
        svc.tick();

        let c = connect(&mut svc, 3, "w1");
        let output = svc.tick();

        let records = frame_for(&output, 1);
        let for_b = records.iter().find(|r| r.id == b).unwrap();
        let for_c = records.iter().find(|r| r.id == c).unwrap();
        assert_eq!(for_b.flag, flags::UPDATE);
        assert_eq!(for_c.flag, flags::INTRODUCE);

        // The newcomer itself has seen nobody yet: two introductions.
        let records = frame_for(&output, 3);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.flag == flags::INTRODUCE));
    }

    // -----------------------------------------------------------------------
    // Dirty flag: Refresh vs Update
    // -----------------------------------------------------------------------

    #[test]
    fn nickname_change_yields_refresh_then_update() {
        let mut svc = RelayService::new();
        connect(&mut svc, 1, "w1");
        let b = connect(&mut svc, 2, "w1");
        svc.tick();

        svc.handle_message(2, &nickname_msg("alice"));

        let output = svc.tick();
        let records = frame_for(&output, 1);
        assert_eq!(records[0].id, b);
        assert_eq!(records[0].flag, flags::REFRESH);
        assert_eq!(records[0].nickname.as_deref(), Some("alice"));

        // No further change: the very next tick downgrades to Update.
        let output = svc.tick();
        let records = frame_for(&output, 1);
        assert_eq!(records[0].flag, flags::UPDATE);
        assert_eq!(records[0].nickname.as_deref(), Some("alice"));
    }

    #[test]
    fn refresh_reaches_every_seen_observer_in_the_same_tick() {
        let mut svc = RelayService::new();
        connect(&mut svc, 1, "w1");
        connect(&mut svc, 2, "w1");
        let c = connect(&mut svc, 3, "w1");
        svc.tick();

        svc.handle_message(3, &nickname_msg("carol"));

        let output = svc.tick();
        for conn in [1, 2] {
            let records = frame_for(&output, conn);
            let for_c = records.iter().find(|r| r.id == c).unwrap();
            assert_eq!(for_c.flag, flags::REFRESH, "observer {conn}");
        }
    }

    #[test]
    fn appearance_set_before_first_contact_still_introduces_bare() {
        let mut svc = RelayService::new();
        connect(&mut svc, 1, "w1");
        let b = connect(&mut svc, 2, "w1");
        svc.handle_message(2, &nickname_msg("bob"));

        let output = svc.tick();
        let records = frame_for(&output, 1);
        assert_eq!(records[0].id, b);
        assert_eq!(records[0].flag, flags::INTRODUCE);

        // The pending dirtiness is honored on the first post-introduction record.
        let output = svc.tick();
        let records = frame_for(&output, 1);
        assert_eq!(records[0].flag, flags::REFRESH);
        assert_eq!(records[0].nickname.as_deref(), Some("bob"));
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    #[test]
    fn deletion_is_delivered_exactly_once_then_the_cursor_is_gone() {
        let mut svc = RelayService::new();
        connect(&mut svc, 1, "w1");
        let b = connect(&mut svc, 2, "w1");
        svc.tick();

        svc.disconnect(2);

        let output = svc.tick();
        let records = frame_for(&output, 1);
        let deletes: Vec<_> = records.iter().filter(|r| r.flag == flags::DELETE).collect();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].id, b);
        assert_eq!(output.removed.len(), 1);
        assert_eq!(output.removed[0].id, b);

        // Reaped: nothing about b ever again.
        let output = svc.tick();
        assert!(frame_for(&output, 1).is_empty());
        assert!(output.removed.is_empty());
        assert_eq!(svc.connection_count(), 1);
    }

    #[test]
    fn tombstoned_cursor_is_not_an_observer_but_still_yields_deletes() {
        let mut svc = RelayService::new();
        connect(&mut svc, 1, "w1");
        let b = connect(&mut svc, 2, "w1");

        // Disconnect before any introduction happened.
        svc.disconnect(2);
        let output = svc.tick();

        // Only the survivor gets a frame.
        assert_eq!(output.frames.len(), 1);
        let records = frame_for(&output, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].flag, flags::DELETE);
        assert_eq!(records[0].id, b);
    }

    // -----------------------------------------------------------------------
    // Position normalization
    // -----------------------------------------------------------------------

    #[test]
    fn position_rescales_into_the_observers_viewport() {
        let mut svc = RelayService::new();
        let a = connect(&mut svc, 1, "w1");
        connect(&mut svc, 2, "w1");

        // A reports a 1000x1000 surface with the pointer dead center.
        svc.handle_message(1, &viewport_msg(1000, 1000));
        svc.handle_message(1, &position_msg(500, 500));
        // B reports a 2000x2000 surface.
        svc.handle_message(2, &viewport_msg(2000, 2000));

        let output = svc.tick();
        let records = frame_for(&output, 2);
        let for_a = records.iter().find(|r| r.id == a).unwrap();
        let (x, y) = for_a.pos.unwrap();
        assert!((x - 1000.0).abs() < 0.5, "x was {x}");
        assert!((y - 1000.0).abs() < 0.5, "y was {y}");
    }

    #[test]
    fn degenerate_viewport_is_ignored() {
        let mut svc = RelayService::new();
        let a = connect(&mut svc, 1, "w1");
        connect(&mut svc, 2, "w1");

        // Zero dimensions must not disturb the 1370x600 fallback.
        svc.handle_message(1, &viewport_msg(0, 0));
        svc.handle_message(1, &position_msg(1370, 600));
        svc.handle_message(2, &viewport_msg(100, 100));

        let output = svc.tick();
        let records = frame_for(&output, 2);
        let for_a = records.iter().find(|r| r.id == a).unwrap();
        let (x, y) = for_a.pos.unwrap();
        assert!((x - 100.0).abs() < 0.5, "x was {x}");
        assert!((y - 100.0).abs() < 0.5, "y was {y}");
    }

    // -----------------------------------------------------------------------
    // Inbound edge cases
    // -----------------------------------------------------------------------

    #[test]
    fn keepalive_is_echoed() {
        let mut svc = RelayService::new();
        connect(&mut svc, 1, "w1");
        let reply = svc.handle_message(1, &[opcodes::CS_KEEPALIVE]);
        assert_eq!(reply.as_deref(), Some(&[opcodes::SC_KEEPALIVE][..]));
    }

    #[test]
    fn malformed_and_unknown_frames_change_nothing() {
        let mut svc = RelayService::new();
        let a = connect(&mut svc, 1, "w1");
        connect(&mut svc, 2, "w1");

        // Truncated position, truncated viewport, unknown opcode.
        assert!(svc.handle_message(1, &[opcodes::CS_POSITION, 1, 2]).is_none());
        assert!(svc.handle_message(1, &[opcodes::CS_VIEWPORT, 9]).is_none());
        assert!(svc.handle_message(1, &[0x7F, 0, 0]).is_none());

        let output = svc.tick();
        let records = frame_for(&output, 2);
        let for_a = records.iter().find(|r| r.id == a).unwrap();
        // Still at the origin with the default viewport.
        assert_eq!(for_a.pos.unwrap(), (0.0, 0.0));
    }

    #[test]
    fn message_from_unknown_connection_is_dropped() {
        let mut svc = RelayService::new();
        assert!(svc.handle_message(99, &[opcodes::CS_KEEPALIVE]).is_none());
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    #[test]
    fn stats_track_worlds_and_ticks() {
        let mut svc = RelayService::new();
        connect(&mut svc, 1, "w1");
        connect(&mut svc, 2, "w1");
        connect(&mut svc, 3, "w2");
        svc.disconnect(3);

        let stats = svc.stats();
        assert_eq!(stats.connections, 3);
        assert_eq!(stats.live_cursors, 2);
        assert_eq!(stats.pending_removal, 1);
        assert_eq!(stats.worlds, 2);
        assert_eq!(stats.total_ticks, 0);

        svc.tick();
        let stats = svc.stats();
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.worlds, 1);
        assert_eq!(stats.total_ticks, 1);
    }
}
