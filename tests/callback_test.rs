//! Callback communicator behavior: shared-message ownership, fair
//! progress, cancellation and unexpected-message delivery.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use halogen::buffer::{Message, SharedMessage};
use halogen::callback::CallbackCommunicator;
use halogen::communicator::Communicator;
use halogen::transport::mem::MemTransport;

#[test]
fn send_multi_shares_one_payload() {
    common::init_tracing();
    let eps = MemTransport::fabric(4);
    let mut comm: CallbackCommunicator<_> = CallbackCommunicator::new(eps[0].clone());

    let msg = SharedMessage::with_size(8).unwrap();
    msg.borrow_mut().typed_mut::<i32>().copy_from_slice(&[5, 6]);
    comm.send_multi(&msg, &[1, 2, 3], 4).unwrap();

    // The caller's handle plus one clone per queued element.
    assert_eq!(msg.use_count(), 4);
    assert_eq!(comm.pending_sends(), 3);
    while comm.progress().unwrap() {}
    assert_eq!(msg.use_count(), 1);

    for rank in 1..4 {
        let peer: Communicator<_> = Communicator::new(eps[rank].clone());
        let got = peer.recv(Message::with_size(8).unwrap(), 0, 4).unwrap().wait().unwrap();
        assert_eq!(got.typed::<i32>(), &[5, 6]);
    }
}

#[test]
fn the_caller_may_drop_its_handle_after_posting() {
    let eps = MemTransport::fabric(2);
    let mut comm: CallbackCommunicator<_> = CallbackCommunicator::new(eps[0].clone());

    {
        let msg = SharedMessage::with_size(4).unwrap();
        msg.borrow_mut().typed_mut::<i32>()[0] = 31;
        comm.send(&msg, 1, 0, |_, _, _, _| {}).unwrap();
        // `msg` drops here; the queued clone keeps the payload alive.
    }
    while comm.progress().unwrap() {}

    let peer: Communicator<_> = Communicator::new(eps[1].clone());
    let got = peer.recv(Message::with_size(4).unwrap(), 0, 0).unwrap().wait().unwrap();
    assert_eq!(got.typed::<i32>()[0], 31);
}

#[test]
fn a_callback_may_post_from_inside_itself() {
    let eps = MemTransport::fabric(1);
    let sender: Communicator<_> = Communicator::new(eps[0].clone());
    for (tag, value) in [(0, 10), (1, 20)] {
        let mut msg = Message::with_size(4).unwrap();
        msg.typed_mut::<i32>()[0] = value;
        sender.blocking_send(msg, 0, tag).unwrap();
    }

    let mut comm: CallbackCommunicator<_> = CallbackCommunicator::new(eps[0].clone());
    let hits = Rc::new(RefCell::new(Vec::new()));
    let outer = hits.clone();
    let msg = SharedMessage::with_size(4).unwrap();
    comm.recv(&msg, 0, 0, move |c, _, _, m| {
        outer.borrow_mut().push(m.borrow().typed::<i32>()[0]);
        let inner = outer.clone();
        c.recv(&m, 0, 1, move |_, _, _, m2| {
            inner.borrow_mut().push(m2.borrow().typed::<i32>()[0]);
        })
        .unwrap();
    })
    .unwrap();

    while comm.progress().unwrap() {}
    assert_eq!(*hits.borrow(), vec![10, 20]);
}

#[test]
fn cancel_drains_unmatched_receives() {
    let mut eps = MemTransport::fabric(2);
    let mut comm: CallbackCommunicator<_> = CallbackCommunicator::new(eps.remove(0));

    let msg = SharedMessage::with_size(4).unwrap();
    comm.recv(&msg, 1, 1, |_, _, _, _| panic!("canceled receive must not fire")).unwrap();
    comm.recv_size(4, 1, 2, |_, _, _, _| panic!("canceled receive must not fire")).unwrap();
    assert_eq!(comm.pending_recvs(), 2);

    assert!(comm.cancel().unwrap());
    assert_eq!(comm.pending_recvs(), 0);
    // Only the caller's handle is left on the first message.
    assert_eq!(msg.use_count(), 1);
}

#[test]
fn detach_then_attach_keeps_the_operation_alive() {
    let eps = MemTransport::fabric(1);
    let mut comm: CallbackCommunicator<_> = CallbackCommunicator::new(eps[0].clone());

    let msg = SharedMessage::with_size(4).unwrap();
    comm.recv(&msg, 0, 6, |_, _, _, _| panic!("detached callback must not fire")).unwrap();
    let (fut, msg) = comm.detach_recv(0, 6).expect("operation is pending");
    assert_eq!(comm.pending_recvs(), 0);

    let got = Rc::new(RefCell::new(None));
    let sink = got.clone();
    comm.attach_recv(fut, msg, 0, 6, move |_, _, _, m| {
        *sink.borrow_mut() = Some(m.borrow().typed::<i32>()[0]);
    });

    let sender: Communicator<_> = Communicator::new(eps[0].clone());
    let mut payload = Message::with_size(4).unwrap();
    payload.typed_mut::<i32>()[0] = 55;
    sender.blocking_send(payload, 0, 6).unwrap();

    while comm.progress().unwrap() {}
    assert_eq!(*got.borrow(), Some(55));
}

#[test]
fn unexpected_messages_surface_through_probe() {
    let eps = MemTransport::fabric(2);
    let sender: Communicator<_> = Communicator::new(eps[0].clone());
    let mut msg = Message::with_size(4).unwrap();
    msg.typed_mut::<i32>()[0] = 99;
    sender.blocking_send(msg, 1, 13).unwrap();

    let mut comm: CallbackCommunicator<_> = CallbackCommunicator::new(eps[1].clone());
    let seen = Rc::new(RefCell::new(None));
    let sink = seen.clone();
    let pending = comm
        .progress_unexpected(move |_, src, tag, m| {
            *sink.borrow_mut() = Some((src, tag, m.borrow().typed::<i32>()[0]));
        })
        .unwrap();
    assert!(!pending);
    assert_eq!(*seen.borrow(), Some((0, 13, 99)));
}

#[test]
#[should_panic(expected = "pending operations")]
fn dropping_with_pending_operations_panics() {
    let mut eps = MemTransport::fabric(2);
    let mut comm: CallbackCommunicator<_> = CallbackCommunicator::new(eps.remove(0));
    let msg = SharedMessage::with_size(4).unwrap();
    comm.recv(&msg, 1, 1, |_, _, _, _| {}).unwrap();
    drop(comm);
}
