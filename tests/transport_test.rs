//! Transport communicator behavior over the in-process fabric:
//! dispatch, cancellation, detach/attach and callback re-registration.

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;

use halogen::buffer::Message;
use halogen::communicator::Communicator;
use halogen::transport::mem::MemTransport;
use halogen::transport::{Rank, Tag};
use halogen::HalogenError;

#[test]
fn future_send_recv_roundtrip() {
    common::init_tracing();
    let mut eps = MemTransport::fabric(2);
    let ep1 = eps.pop().unwrap();
    let ep0 = eps.pop().unwrap();

    let sender = thread::spawn(move || {
        let comm: Communicator<_> = Communicator::new(ep0);
        let mut msg = Message::with_size(8 * 4).unwrap();
        for (i, v) in msg.typed_mut::<i32>().iter_mut().enumerate() {
            *v = i as i32;
        }
        // Blocking send returns the buffer for reuse.
        let msg = comm.blocking_send(msg, 1, 7).unwrap();
        assert_eq!(msg.size(), 32);
    });

    let receiver = thread::spawn(move || {
        let comm: Communicator<_> = Communicator::new(ep1);
        let fut = comm.recv(Message::with_size(32).unwrap(), 0, 7).unwrap();
        let msg = fut.wait().unwrap();
        assert_eq!(msg.typed::<i32>(), (0..8).collect::<Vec<_>>().as_slice());
    });

    sender.join().unwrap();
    receiver.join().unwrap();
}

#[test]
fn receives_match_by_tag_not_arrival_order() {
    let mut eps = MemTransport::fabric(2);
    let ep1 = eps.pop().unwrap();
    let ep0 = eps.pop().unwrap();
    let comm0: Communicator<_> = Communicator::new(ep0);
    let comm1: Communicator<_> = Communicator::new(ep1);

    let mut a = Message::with_size(4).unwrap();
    a.typed_mut::<i32>()[0] = 11;
    comm0.blocking_send(a, 1, 1).unwrap();
    let mut b = Message::with_size(4).unwrap();
    b.typed_mut::<i32>()[0] = 22;
    comm0.blocking_send(b, 1, 2).unwrap();

    // The tag-2 message arrived second but is receivable first.
    let late = comm1.recv(Message::with_size(4).unwrap(), 0, 2).unwrap().wait().unwrap();
    assert_eq!(late.typed::<i32>()[0], 22);
    let early = comm1.recv(Message::with_size(4).unwrap(), 0, 1).unwrap().wait().unwrap();
    assert_eq!(early.typed::<i32>()[0], 11);
}

#[test]
fn cancel_wins_before_any_matching_send() {
    let mut eps = MemTransport::fabric(2);
    let comm: Communicator<_> = Communicator::new(eps.remove(0));
    let fut = comm.recv(Message::with_size(16).unwrap(), 1, 42).unwrap();
    let (canceled, msg) = fut.cancel().unwrap();
    assert!(canceled);
    assert_eq!(msg.size(), 16);
}

#[test]
fn cancel_loses_to_a_completed_receive() {
    let eps = MemTransport::fabric(1);
    let comm: Communicator<_> = Communicator::new(eps[0].clone());
    comm.blocking_send(Message::with_size(4).unwrap(), 0, 3).unwrap();

    let fut = comm.recv(Message::with_size(4).unwrap(), 0, 3).unwrap();
    let (canceled, _msg) = fut.cancel().unwrap();
    assert!(!canceled);
}

#[test]
fn oversized_message_fails_the_future() {
    let eps = MemTransport::fabric(1);
    let comm: Communicator<_> = Communicator::new(eps[0].clone());
    comm.blocking_send(Message::with_size(16).unwrap(), 0, 9).unwrap();

    let fut = comm.recv(Message::with_size(8).unwrap(), 0, 9).unwrap();
    match fut.wait() {
        Err(HalogenError::Truncation { capacity: 8, incoming: 16 }) => {}
        other => panic!("expected truncation, got {:?}", other.map(|m| m.size())),
    }
}

#[test]
fn progress_handles_one_completion_per_call() {
    let eps = MemTransport::fabric(1);
    let mut comm: Communicator<_> = Communicator::new(eps[0].clone());
    comm.blocking_send(Message::with_size(4).unwrap(), 0, 1).unwrap();
    comm.blocking_send(Message::with_size(4).unwrap(), 0, 2).unwrap();

    let fired = Rc::new(RefCell::new(0));
    for tag in [1, 2] {
        let fired = fired.clone();
        comm.recv_cb(Message::with_size(4).unwrap(), 0, tag, move |_, _, _, _| {
            *fired.borrow_mut() += 1;
        })
        .unwrap();
    }

    // Both operations are complete, but each progress call delivers one.
    assert!(comm.progress().unwrap());
    assert_eq!(*fired.borrow(), 1);
    assert!(!comm.progress().unwrap());
    assert_eq!(*fired.borrow(), 2);
}

/// A receive callback posts the next receive from inside itself; ten
/// chained receives complete and leave the registry empty.
#[test]
fn callback_reregistration_chain() {
    let results = common::run_world(2, |rank, _setup, transport| {
        if rank == 0 {
            let comm: Communicator<_> = Communicator::new(transport);
            for v in 0..10i32 {
                let mut msg = Message::with_size(4).unwrap();
                msg.typed_mut::<i32>()[0] = v;
                comm.blocking_send(msg, 1, 42 + v).unwrap();
            }
            Vec::new()
        } else {
            fn arm(
                comm: &mut Communicator<MemTransport>,
                msg: Message,
                tag: Tag,
                seen: Rc<RefCell<Vec<i32>>>,
            ) {
                comm.recv_cb(msg, 0, tag, move |c, _src: Rank, t, m| {
                    seen.borrow_mut().push(m.typed::<i32>()[0]);
                    if t < 51 {
                        arm(c, m, t + 1, seen);
                    }
                })
                .unwrap();
            }

            let mut comm: Communicator<_> = Communicator::new(transport);
            let seen = Rc::new(RefCell::new(Vec::new()));
            arm(&mut comm, Message::with_size(4).unwrap(), 42, seen.clone());
            while comm.progress().unwrap() {}
            assert_eq!(comm.pending_callbacks(), 0);
            Rc::try_unwrap(seen).unwrap().into_inner()
        }
    });
    assert_eq!(results[1], (0..10).collect::<Vec<_>>());
}

#[test]
fn detach_returns_the_pending_future() {
    let mut eps = MemTransport::fabric(2);
    let mut comm: Communicator<_> = Communicator::new(eps.remove(0));
    comm.recv_cb(Message::with_size(4).unwrap(), 1, 5, |_, _, _, _| {
        panic!("detached operation must not fire its callback");
    })
    .unwrap();

    let fut = comm.detach(1, 5);
    assert_eq!(comm.pending_callbacks(), 0);
    let (canceled, _msg) = fut.cancel().unwrap();
    assert!(canceled);
}

#[test]
#[should_panic(expected = "no registration")]
fn detach_of_unknown_registration_panics() {
    let mut eps = MemTransport::fabric(1);
    let mut comm: Communicator<_> = Communicator::new(eps.remove(0));
    let _ = comm.detach(0, 1);
}

#[test]
fn attach_converts_a_future_into_a_registration() {
    let eps = MemTransport::fabric(1);
    let mut comm: Communicator<_> = Communicator::new(eps[0].clone());
    let fut = comm.recv(Message::with_size(4).unwrap(), 0, 8).unwrap();

    let got = Rc::new(RefCell::new(None));
    let sink = got.clone();
    comm.attach(fut, 0, 8, move |_, _, _, msg| {
        *sink.borrow_mut() = Some(msg.typed::<i32>()[0]);
    });

    let mut msg = Message::with_size(4).unwrap();
    msg.typed_mut::<i32>()[0] = 77;
    comm.blocking_send(msg, 0, 8).unwrap();
    while comm.progress().unwrap() {}
    assert_eq!(*got.borrow(), Some(77));
}

#[test]
fn cancel_callbacks_on_empty_registry_is_true() {
    let mut eps = MemTransport::fabric(1);
    let mut comm: Communicator<_> = Communicator::new(eps.remove(0));
    assert!(comm.cancel_callbacks().unwrap());
}

#[test]
fn cancel_callbacks_drains_the_registry() {
    let mut eps = MemTransport::fabric(2);
    let mut comm: Communicator<_> = Communicator::new(eps.remove(0));
    for tag in 0..3 {
        comm.recv_cb(Message::with_size(4).unwrap(), 1, tag, |_, _, _, _| {
            panic!("canceled operation must not fire its callback");
        })
        .unwrap();
    }
    assert!(comm.cancel_callbacks().unwrap());
    assert_eq!(comm.pending_callbacks(), 0);
}

#[test]
#[should_panic(expected = "unresolved callback registrations")]
fn dropping_with_pending_registrations_panics() {
    let mut eps = MemTransport::fabric(2);
    let mut comm: Communicator<_> = Communicator::new(eps.remove(0));
    comm.recv_cb(Message::with_size(4).unwrap(), 1, 1, |_, _, _, _| {}).unwrap();
    drop(comm);
}
