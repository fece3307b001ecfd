//! Minimal producer/consumer hand-off through an unbounded linked
//! ring queue.

use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;

use ring_queues::{LprQueue, MpmcQueue};

fn main() {
    // segment size 64, room for 2 registered threads
    let queue = Arc::new(LprQueue::<u64>::new(64, 2));

    let producer_queue = queue.clone();
    let producer = thread::spawn(move || {
        for i in 0..1_000u64 {
            let item = NonNull::new(Box::into_raw(Box::new(i))).unwrap();
            // unbounded: never refuses
            producer_queue.push(item, 0).unwrap();
        }
        println!("producer done");
    });

    let consumer_queue = queue.clone();
    let consumer = thread::spawn(move || {
        let mut received = 0u64;
        while received < 1_000 {
            match consumer_queue.pop(1) {
                Ok(p) => {
                    let value = unsafe { *Box::from_raw(p.as_ptr()) };
                    assert_eq!(value, received);
                    received += 1;
                }
                Err(_) => thread::yield_now(),
            }
        }
        println!("consumer done: {received} items in order");
    });

    producer.join().unwrap();
    consumer.join().unwrap();
}
