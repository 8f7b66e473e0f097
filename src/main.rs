//! # rtcore demo firmware
//!
//! A single-producer, two-consumer scenario built on [`rtcore::Mutex`] and
//! [`rtcore::Condvar`]: `producer` pushes a value under the mutex and
//! signals the condvar; `consumer_a` and `consumer_b` both wait on it and
//! race to pick up the next value, looping on the predicate the way every
//! condvar consumer must, since a signal only promises "recheck", not
//! "it's yours".

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;

use rtcore::kernel::{self, TaskConfig};
use rtcore::{Condvar, Mutex, Timeout};

static mut MUTEX: Option<Mutex> = None;
static mut COND: Option<Condvar> = None;
static mut DATA: u32 = 0;

fn mutex() -> Mutex {
    #[allow(static_mut_refs)]
    unsafe {
        MUTEX.expect("mutex initialized before any task runs")
    }
}

fn cond() -> Condvar {
    #[allow(static_mut_refs)]
    unsafe {
        COND.expect("condvar initialized before any task runs")
    }
}

fn producer() -> ! {
    let mut counter: u32 = 1;
    loop {
        kernel::sleep(1000).ok();

        mutex().lock().ok();
        #[allow(static_mut_refs)]
        unsafe {
            DATA = counter;
        }
        log::info!("producer: produced {}", counter);
        counter = counter.wrapping_add(1);
        mutex().unlock().ok();

        cond().signal().ok();
    }
}

fn consume(name: &str) -> ! {
    loop {
        mutex().lock().ok();
        #[allow(static_mut_refs)]
        while unsafe { DATA } == 0 {
            log::debug!("{name}: waiting for data");
            cond().wait_for(mutex(), Timeout::Infinite).ok();
        }
        #[allow(static_mut_refs)]
        let value = unsafe { DATA };
        log::info!("{name}: consumed {}", value);
        #[allow(static_mut_refs)]
        unsafe {
            DATA = 0;
        }
        mutex().unlock().ok();
    }
}

fn consumer_a() -> ! {
    consume("consumer_a")
}

fn consumer_b() -> ! {
    consume("consumer_b")
}

#[entry]
fn main() -> ! {
    kernel::init();

    let m = Mutex::init().expect("mutex slab has room at startup");
    let c = Condvar::init().expect("condvar slab has room at startup");
    #[allow(static_mut_refs)]
    unsafe {
        MUTEX = Some(m);
        COND = Some(c);
    }

    kernel::create(
        producer,
        TaskConfig { name: "producer", priority: 2 },
    )
    .expect("failed to create producer");

    kernel::create(
        consumer_a,
        TaskConfig { name: "consumer_a", priority: 1 },
    )
    .expect("failed to create consumer_a");

    kernel::create(
        consumer_b,
        TaskConfig { name: "consumer_b", priority: 1 },
    )
    .expect("failed to create consumer_b");

    kernel::start()
}
