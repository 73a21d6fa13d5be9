//! End-to-end transfer flows: link events in, reply bytes and store
//! effects out. Driven through `Dispatcher::pump` for determinism.

use super::mock_link::*;

use ota_bt::adapters::sim_store::SimFirmwareStore;
use ota_bt::config::{OtaConfig, SizeMismatchPolicy};
use ota_bt::error::Error;
use ota_bt::ota::events::{AbortReason, FailureReason, TransferEvent};
use ota_bt::ota::{RunExit, TransferState};

// ── Happy path ────────────────────────────────────────────────

#[test]
fn ten_byte_image_acks_each_frame_and_reboots() {
    let mut h = harness();
    let img = image(10);

    h.handle.on_connect();
    h.handle.on_data(&whole_transfer(&img));

    assert_eq!(h.dispatcher.pump(), Some(RunExit::Rebooted));
    assert_eq!(h.transport.replies(), vec![ACK, ACK, ACK]);

    let store = h.dispatcher.store();
    assert_eq!(store.reboots(), 1);
    assert_eq!(store.running_slot(), store.boot_slot());
    assert_eq!(store.open_sessions(), 0);
}

#[test]
fn multi_chunk_image_is_written_in_order() {
    let mut h = harness();
    let img = image(5000);
    h.clock.advance(100);

    h.handle.on_connect();
    h.dispatcher.pump();
    let bytes = whole_transfer(&img);
    let (head, tail) = bytes.split_at(3000);
    h.handle.on_data(head);
    assert_eq!(h.dispatcher.pump(), None);
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Receiving);

    h.clock.advance(2000);
    assert_eq!(h.dispatcher.store().boot_image(), None);

    h.handle.on_data(tail);
    assert_eq!(h.dispatcher.pump(), Some(RunExit::Rebooted));

    // start + 5 chunks + end
    assert_eq!(h.transport.replies(), vec![ACK; 7]);
    let completed = h.dispatcher.sink().events.iter().find_map(|e| match e {
        TransferEvent::Completed(stats) => Some(*stats),
        _ => None,
    });
    let stats = completed.expect("completion event");
    assert_eq!(stats.bytes, 5000);
    assert_eq!(stats.chunks, 5);
    assert_eq!(stats.elapsed_ms, 2000);
}

#[test]
fn byte_at_a_time_delivery_decodes_identically() {
    let mut h = harness();
    h.handle.on_connect();
    h.dispatcher.pump();

    for byte in whole_transfer(&image(64)) {
        h.handle.on_data(&[byte]);
        if let Some(exit) = h.dispatcher.pump() {
            assert_eq!(exit, RunExit::Rebooted);
        }
    }
    assert_eq!(h.transport.replies(), vec![ACK, ACK, ACK]);
    assert_eq!(h.dispatcher.store().reboots(), 1);
}

// ── Sequencing ────────────────────────────────────────────────

#[test]
fn chunk_before_start_is_nak() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&chunk_frame(b"early"));
    h.dispatcher.pump();

    assert_eq!(h.transport.replies(), vec![NAK]);
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Idle);
    assert_eq!(h.dispatcher.bytes_received(), 0);
}

#[test]
fn end_before_start_is_nak_without_reboot() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&end_frame());
    assert_eq!(h.dispatcher.pump(), None);
    assert_eq!(h.transport.replies(), vec![NAK]);
    assert_eq!(h.dispatcher.store().reboots(), 0);
}

#[test]
fn second_start_while_receiving_is_nak() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&start_frame(100));
    h.handle.on_data(&start_frame(200));
    h.dispatcher.pump();

    assert_eq!(h.transport.replies(), vec![ACK, NAK]);
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Receiving);
    assert_eq!(h.dispatcher.store().open_sessions(), 1);
}

#[test]
fn finish_update_tracks_transfer() {
    let mut h = harness();
    assert_eq!(h.dispatcher.finish_update(), Err(Error::InvalidState));
    h.handle.on_connect();
    h.dispatcher.pump();
    assert_eq!(h.dispatcher.finish_update(), Err(Error::InvalidState));
    h.handle.on_data(&start_frame(16));
    h.dispatcher.pump();
    assert!(h.dispatcher.finish_update().is_ok());
}

// ── Malformed input ───────────────────────────────────────────

#[test]
fn oversized_chunk_length_is_nak_and_resyncs() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&start_frame(4));
    // Declares 2000 bytes; only the header is dropped.
    h.handle.on_data(&[0x02, 0x07, 0xD0]);
    h.handle.on_data(&chunk_frame(b"abcd"));
    h.handle.on_data(&end_frame());

    assert_eq!(h.dispatcher.pump(), Some(RunExit::Rebooted));
    assert_eq!(h.transport.replies(), vec![ACK, NAK, ACK, ACK]);
    assert!(
        h.dispatcher
            .sink()
            .contains(&TransferEvent::Malformed { declared_len: 2000 })
    );
}

#[test]
fn stray_bytes_get_no_reply() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&[0x00, 0x7E, 0xAA, 0xFF]);
    h.handle.on_data(&start_frame(8));
    h.dispatcher.pump();

    assert_eq!(h.transport.replies(), vec![ACK]);
}

#[test]
fn size_mismatch_is_rejected_by_default() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&start_frame(8));
    h.handle.on_data(&chunk_frame(b"half"));
    h.handle.on_data(&end_frame());

    assert_eq!(h.dispatcher.pump(), None);
    assert_eq!(h.transport.replies(), vec![ACK, ACK, NAK]);
    assert_eq!(h.dispatcher.store().reboots(), 0);
    assert!(h.dispatcher.sink().contains(&TransferEvent::Failed(
        FailureReason::SizeMismatch {
            received: 4,
            expected: 8,
        }
    )));
}

#[test]
fn size_mismatch_warn_policy_finalizes_anyway() {
    let mut h = harness_with(OtaConfig {
        size_mismatch: SizeMismatchPolicy::Warn,
        ..test_config()
    });
    h.handle.on_connect();
    h.handle.on_data(&start_frame(8));
    h.handle.on_data(&chunk_frame(b"half"));
    h.handle.on_data(&end_frame());

    assert_eq!(h.dispatcher.pump(), Some(RunExit::Rebooted));
    assert_eq!(h.transport.replies(), vec![ACK, ACK, ACK]);
}

#[test]
fn write_failure_naks_and_allows_restart() {
    let mut h = harness_with_store(test_config(), SimFirmwareStore::with_slot_size(4));
    h.handle.on_connect();
    h.handle.on_data(&start_frame(8));
    h.handle.on_data(&chunk_frame(b"too long"));
    h.dispatcher.pump();

    assert_eq!(h.transport.take_replies(), vec![ACK, NAK]);
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Idle);
    assert_eq!(h.dispatcher.store().open_sessions(), 0);

    h.handle.on_data(&start_frame(4));
    h.handle.on_data(&chunk_frame(b"fits"));
    h.handle.on_data(&end_frame());
    assert_eq!(h.dispatcher.pump(), Some(RunExit::Rebooted));
    assert_eq!(h.transport.replies(), vec![ACK, ACK, ACK]);
}

#[test]
fn empty_image_fails_verification() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&start_frame(0));
    h.handle.on_data(&end_frame());

    assert_eq!(h.dispatcher.pump(), None);
    assert_eq!(h.transport.replies(), vec![ACK, NAK]);
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Idle);
}

// ── Connection lifecycle ──────────────────────────────────────

#[test]
fn disconnect_aborts_and_fresh_start_is_accepted() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&start_frame(1024));
    h.handle.on_data(&chunk_frame(&image(100)));
    h.handle.on_disconnect();
    h.dispatcher.pump();

    assert!(!h.dispatcher.is_connected());
    assert_eq!(h.dispatcher.store().open_sessions(), 0);
    assert_eq!(h.dispatcher.store().aborted(), 1);
    assert!(
        h.dispatcher
            .sink()
            .contains(&TransferEvent::Aborted(AbortReason::Disconnected))
    );

    h.transport.take_replies();
    h.handle.on_connect();
    h.handle.on_data(&start_frame(16));
    h.dispatcher.pump();
    assert_eq!(h.transport.replies(), vec![ACK]);
    assert_eq!(h.dispatcher.bytes_received(), 0);
}

#[test]
fn partial_frame_does_not_survive_reconnect() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&[0x01, 0x00, 0x00]);
    h.dispatcher.pump();
    assert_eq!(h.dispatcher.buffered(), 3);

    h.handle.on_disconnect();
    h.handle.on_connect();
    h.handle.on_data(&end_frame());
    h.dispatcher.pump();

    // The end frame is read on its own, not as the tail of a start frame.
    assert_eq!(h.transport.replies(), vec![NAK]);
    assert_eq!(h.dispatcher.buffered(), 0);
}

#[test]
fn data_without_connection_is_dropped() {
    let mut h = harness();
    h.handle.on_data(&start_frame(8));
    assert_eq!(h.dispatcher.pump(), None);
    assert!(h.transport.replies().is_empty());
    assert!(!h.dispatcher.is_connected());
}

#[test]
fn connect_while_connected_resets_session() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&start_frame(8));
    h.handle.on_connect();
    h.dispatcher.pump();

    assert!(h.dispatcher.is_connected());
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Idle);
    assert_eq!(h.dispatcher.store().open_sessions(), 0);
}

#[test]
fn lost_disconnect_closes_session_opened_by_queued_start() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&start_frame(64));
    fill_queue(&h.handle);
    // No room left: the disconnect notification is lost.
    h.handle.on_disconnect();
    h.dispatcher.pump();

    // The client's own Start is handled in order, then its session closes.
    assert_eq!(h.transport.replies(), vec![ACK]);
    assert!(!h.dispatcher.is_connected());
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Idle);
    assert_eq!(h.dispatcher.store().open_sessions(), 0);
    assert_eq!(h.dispatcher.store().aborted(), 1);
    assert!(
        h.dispatcher
            .sink()
            .contains(&TransferEvent::Aborted(AbortReason::Disconnected))
    );
}

#[test]
fn lost_reconnect_gives_next_client_a_fresh_session() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&start_frame(64));
    h.dispatcher.pump();
    h.transport.take_replies();

    fill_queue(&h.handle);
    h.handle.on_disconnect();
    h.handle.on_connect();
    // Make room as if the dispatcher had taken one event.
    assert!(h.link.try_receive().is_some());
    h.handle.on_data(&start_frame(32));
    h.dispatcher.pump();

    // The old session is aborted before the new client's Start is handled.
    assert_eq!(h.transport.replies(), vec![ACK]);
    assert_eq!(h.dispatcher.store().aborted(), 1);
    assert_eq!(h.dispatcher.store().open_sessions(), 1);
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Receiving);
    assert_eq!(h.dispatcher.bytes_received(), 0);
    assert!(h.dispatcher.finish_update().is_ok());
}

#[test]
fn lost_disconnect_with_no_transfer_leaves_nothing_open() {
    let mut h = harness();
    h.handle.on_connect();
    h.dispatcher.pump();

    fill_queue(&h.handle);
    h.handle.on_disconnect();
    h.handle.on_connect();
    h.dispatcher.pump();

    assert!(h.dispatcher.is_connected());
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Idle);
    assert_eq!(h.dispatcher.store().open_sessions(), 0);
    assert!(h.transport.replies().is_empty());
}

#[test]
fn shutdown_is_honoured_when_queue_is_full() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&start_frame(64));
    fill_queue(&h.handle);
    h.handle.shutdown();

    assert_eq!(h.dispatcher.pump(), Some(RunExit::Shutdown));
    assert_eq!(h.dispatcher.store().open_sessions(), 0);
    assert!(
        h.dispatcher
            .sink()
            .contains(&TransferEvent::Aborted(AbortReason::Shutdown))
    );
}

#[test]
fn shutdown_aborts_in_flight_transfer() {
    let mut h = harness();
    h.handle.on_connect();
    h.handle.on_data(&start_frame(64));
    h.handle.shutdown();

    assert_eq!(h.dispatcher.pump(), Some(RunExit::Shutdown));
    assert_eq!(h.dispatcher.store().open_sessions(), 0);
    assert!(
        h.dispatcher
            .sink()
            .contains(&TransferEvent::Aborted(AbortReason::Shutdown))
    );
}

#[test]
fn transport_failure_does_not_stall_the_session() {
    let mut h = harness();
    h.transport.set_failing(true);
    h.handle.on_connect();
    h.handle.on_data(&start_frame(4));
    h.dispatcher.pump();

    assert!(h.transport.replies().is_empty());
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Receiving);

    h.transport.set_failing(false);
    h.handle.on_data(&chunk_frame(b"abcd"));
    h.dispatcher.pump();
    assert_eq!(h.transport.replies(), vec![ACK]);
}

// ── Idle timeout ──────────────────────────────────────────────

#[test]
fn stalled_transfer_expires_after_idle_timeout() {
    let mut h = harness_with(OtaConfig {
        idle_timeout_ms: 1000,
        ..test_config()
    });
    h.handle.on_connect();
    h.handle.on_data(&start_frame(64));
    h.handle.on_data(&[0x02, 0x00]);
    h.dispatcher.pump();

    h.clock.advance(999);
    h.dispatcher.pump();
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Receiving);

    h.clock.advance(1);
    h.dispatcher.pump();
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Idle);
    assert_eq!(h.dispatcher.buffered(), 0);
    assert_eq!(h.dispatcher.store().open_sessions(), 0);
    assert!(
        h.dispatcher
            .sink()
            .contains(&TransferEvent::Aborted(AbortReason::IdleTimeout))
    );
    // No reply for a timeout.
    assert_eq!(h.transport.replies(), vec![ACK]);
    assert!(h.dispatcher.is_connected());
}

#[test]
fn any_delivery_resets_the_idle_timer() {
    let mut h = harness_with(OtaConfig {
        idle_timeout_ms: 1000,
        ..test_config()
    });
    h.handle.on_connect();
    h.handle.on_data(&start_frame(64));
    h.dispatcher.pump();

    h.clock.advance(800);
    h.handle.on_data(&[0x02]);
    h.dispatcher.pump();
    h.clock.advance(800);
    h.dispatcher.pump();
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Receiving);
}

#[test]
fn idle_timeout_only_applies_while_receiving() {
    let mut h = harness_with(OtaConfig {
        idle_timeout_ms: 1000,
        ..test_config()
    });
    h.handle.on_connect();
    h.dispatcher.pump();
    h.clock.advance(60_000);
    h.dispatcher.pump();

    assert!(h.dispatcher.is_connected());
    assert!(
        !h.dispatcher
            .sink()
            .events
            .iter()
            .any(|e| matches!(e, TransferEvent::Aborted(_)))
    );
}

#[test]
fn zero_idle_timeout_never_expires() {
    let mut h = harness_with(OtaConfig {
        idle_timeout_ms: 0,
        ..test_config()
    });
    h.handle.on_connect();
    h.handle.on_data(&start_frame(64));
    h.dispatcher.pump();
    h.clock.advance(u64::from(u32::MAX));
    h.dispatcher.pump();
    assert_eq!(h.dispatcher.transfer_state(), TransferState::Receiving);
}
