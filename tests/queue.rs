use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crossbeam_utils::thread::scope;
use kvs::{BoundedQueue, Closed, KvError};
use rand::prelude::*;

#[test]
fn rejects_capacity_below_two() {
    assert!(matches!(
        BoundedQueue::<u32>::new(1),
        Err(KvError::Config(_))
    ));
    assert!(BoundedQueue::<u32>::new(2).is_ok());
}

// Random single-threaded interleavings never break the count bounds and
// always come out in insertion order.
#[test]
fn random_operations_keep_fifo_and_bounds() {
    let mut rng = StdRng::seed_from_u64(7);
    for capacity in 2..8 {
        let queue = BoundedQueue::new(capacity).unwrap();
        let mut model = VecDeque::new();
        let mut next = 0u32;

        for _ in 0..500 {
            let push = rng.gen_bool(0.5);
            if push && !queue.is_full() {
                queue.enqueue(next).unwrap();
                model.push_back(next);
                next += 1;
            } else if !queue.is_empty() {
                assert_eq!(queue.dequeue(), model.pop_front());
            }
            assert!(queue.len() <= capacity);
            assert_eq!(queue.len(), model.len());
            assert_eq!(queue.is_full(), model.len() == capacity);
        }
    }
}

#[test]
fn enqueue_blocks_while_full_until_a_dequeue() {
    let queue = BoundedQueue::new(2).unwrap();
    queue.enqueue(1).unwrap();
    queue.enqueue(2).unwrap();
    assert!(queue.is_full());

    let inserted = AtomicBool::new(false);
    scope(|s| {
        s.spawn(|_| {
            queue.enqueue(3).unwrap();
            inserted.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(200));
        assert!(!inserted.load(Ordering::SeqCst), "enqueue must wait for a free slot");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.dequeue(), Some(1));
    })
    .unwrap();

    assert!(inserted.load(Ordering::SeqCst));
    assert_eq!(queue.dequeue(), Some(2));
    assert_eq!(queue.dequeue(), Some(3));
}

#[test]
fn dequeue_blocks_while_empty_until_an_enqueue() {
    let queue = BoundedQueue::new(4).unwrap();
    let received = Mutex::new(None);

    scope(|s| {
        s.spawn(|_| {
            *received.lock().unwrap() = queue.dequeue();
        });

        thread::sleep(Duration::from_millis(200));
        assert!(received.lock().unwrap().is_none());
        queue.enqueue("hello").unwrap();
    })
    .unwrap();

    assert_eq!(*received.lock().unwrap(), Some("hello"));
}

#[test]
fn close_wakes_blocked_producer_with_its_item() {
    let queue = BoundedQueue::new(2).unwrap();
    queue.enqueue(1).unwrap();
    queue.enqueue(2).unwrap();

    scope(|s| {
        let producer = s.spawn(|_| queue.enqueue(3));
        thread::sleep(Duration::from_millis(100));
        queue.close();
        match producer.join().unwrap() {
            Err(Closed(item)) => assert_eq!(item, 3),
            Ok(()) => panic!("enqueue succeeded on a closed queue"),
        }
    })
    .unwrap();
}

#[test]
fn close_wakes_blocked_consumers() {
    let queue = BoundedQueue::<u32>::new(2).unwrap();

    scope(|s| {
        let consumers: Vec<_> = (0..3).map(|_| s.spawn(|_| queue.dequeue())).collect();
        thread::sleep(Duration::from_millis(100));
        queue.close();
        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    })
    .unwrap();
}

#[test]
fn closed_queue_hands_out_remaining_items_first() {
    let queue = BoundedQueue::new(3).unwrap();
    queue.enqueue('a').unwrap();
    queue.enqueue('b').unwrap();
    queue.close();

    assert!(queue.is_closed());
    assert!(matches!(queue.enqueue('c'), Err(Closed('c'))));
    assert_eq!(queue.dequeue(), Some('a'));
    assert_eq!(queue.dequeue(), Some('b'));
    assert_eq!(queue.dequeue(), None);
}

#[test]
fn drain_empties_the_queue_in_order() {
    let queue = BoundedQueue::new(4).unwrap();
    for i in 0..4 {
        queue.enqueue(i).unwrap();
    }
    assert_eq!(queue.drain(), vec![0, 1, 2, 3]);
    assert!(queue.is_empty());
}

#[test]
fn single_consumer_sees_strict_fifo_under_contention() {
    let queue = BoundedQueue::new(3).unwrap();
    let received = Mutex::new(Vec::new());

    scope(|s| {
        s.spawn(|_| {
            for i in 0..1000 {
                queue.enqueue(i).unwrap();
            }
        });
        s.spawn(|_| {
            for _ in 0..1000 {
                let item = queue.dequeue().unwrap();
                received.lock().unwrap().push(item);
            }
        });
    })
    .unwrap();

    let received = received.into_inner().unwrap();
    assert_eq!(received, (0..1000).collect::<Vec<_>>());
}

#[test]
fn many_consumers_receive_every_item_once() {
    let queue = BoundedQueue::new(4).unwrap();
    let sum = AtomicUsize::new(0);
    let count = AtomicUsize::new(0);

    scope(|s| {
        for _ in 0..4 {
            s.spawn(|_| {
                while let Some(item) = queue.dequeue() {
                    sum.fetch_add(item, Ordering::SeqCst);
                    count.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        for _ in 0..2 {
            s.spawn(|_| {
                for i in 1..=500 {
                    queue.enqueue(i).unwrap();
                }
            });
        }
        while count.load(Ordering::SeqCst) < 1000 {
            thread::sleep(Duration::from_millis(5));
        }
        queue.close();
    })
    .unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1000);
    assert_eq!(sum.load(Ordering::SeqCst), 2 * (500 * 501 / 2));
}
