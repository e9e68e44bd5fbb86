use std::env::{args, var};
use std::str::FromStr;
use std::string::ToString;
use std::time::{Duration, Instant};

use log::{LevelFilter, Log, Metadata, Record};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use locks_n_queues::{
    scenarios::{self, Workload},
    ConcurrentQueue, Semaphore, SpinLock,
};

/// env variable with the log level, `info` if not set
const LOG_ENV: &str = "LOCKS_LOG";

fn main() -> Result<(), String> {
    init_logger()?;
    let mut args = args().skip(1);
    let demo = args
        .next()
        .ok_or(format!(
            "no demo supplied, use one of {} or see unit tests",
            Demo::iter()
                .map(|d| d.to_string())
                .collect::<Vec<String>>()
                .join(",")
        ))
        .and_then(|selector| Demo::from_str(&selector).map_err(|e| format!("{selector}: {e}")))?;
    let workload = workload(args.next(), args.next())?;
    log::debug!("running {demo} with {workload:?}");

    match demo {
        Demo::LostUpdates => lost_updates(workload),
        Demo::SpinLock => spin_lock(workload),
        Demo::Semaphore => semaphore(workload),
        Demo::Queue => queue(workload),
        Demo::FlushRace => flush_race(),
        Demo::Timeout => timeout(),
    }
    Ok(())
}

#[derive(EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
enum Demo {
    LostUpdates,
    SpinLock,
    Semaphore,
    Queue,
    FlushRace,
    Timeout,
}

/// threads and iterations from the command line, the 100 x 500 default otherwise
fn workload(threads: Option<String>, iterations: Option<String>) -> Result<Workload, String> {
    let default = Workload::default();
    let parse = |arg: Option<String>, default: usize| match arg {
        Some(arg) => arg
            .parse::<usize>()
            .map_err(|e| format!("`{arg}' isn't a count: {e}")),
        None => Ok(default),
    };
    let workload = Workload {
        threads: parse(threads, default.threads)?,
        iterations: parse(iterations, default.iterations)?,
    };
    workload
        .threads
        .checked_mul(workload.iterations)
        .ok_or(format!(
            "{} threads x {} iterations is too much work",
            workload.threads, workload.iterations
        ))?;
    Ok(workload)
}

fn lost_updates(workload: Workload) {
    let expected = workload.total();
    println!("{} threads x {} increments", workload.threads, workload.iterations);
    println!("unguarded: {} of {expected}", scenarios::count_unguarded(workload));
    println!("spin lock: {} of {expected}", scenarios::count_with_spin_lock(workload));
    println!("mutex:     {} of {expected}", scenarios::count_with_mutex(workload));
}

fn spin_lock(workload: Workload) {
    let x = SpinLock::new(Vec::new());
    std::thread::scope(|s| {
        for t in 0..workload.threads {
            let x = &x;
            s.spawn(move || x.lock().push(t));
        }
    });
    let vec_guard = x.lock();
    println!("{} pushes went through: {:?}", vec_guard.len(), *vec_guard);
}

fn semaphore(workload: Workload) {
    // 3 slots for all the threads
    let slots = Semaphore::new(3);
    let start = Instant::now();
    std::thread::scope(|s| {
        for _ in 0..workload.threads {
            s.spawn(|| {
                let _permit = slots.access();
                std::thread::sleep(Duration::from_millis(10));
            });
        }
    });
    println!(
        "{} threads x 10ms through 3 slots took {:?}",
        workload.threads,
        start.elapsed()
    );
}

fn queue(workload: Workload) {
    println!("{} producers x {} items", workload.threads, workload.iterations);
    let unguarded = locks_n_queues::queue::UnguardedQueue::with_capacity(workload.total());
    println!("unguarded: {} of {}", scenarios::fill(&unguarded, workload), workload.total());
    let guarded = ConcurrentQueue::new();
    println!("guarded:   {} of {}", scenarios::fill(&guarded, workload), workload.total());

    // the same queue again, this time with blocking consumers on the other end
    guarded.flush();
    let consumers = (1..=4).rev().find(|c| workload.total() % c == 0).unwrap_or(1);
    let items = scenarios::transfer(&guarded, workload, consumers);
    println!("{consumers} consumers got {} items", items.len());
}

fn flush_race() {
    match scenarios::semaphore_flush_race() {
        Ok(1) => println!("semaphore queue: the consumer beat the flush and got 1"),
        Ok(v) => println!("semaphore queue: the flush drained the consumer's unit, it waited for {v}"),
        Err(e) => println!("semaphore queue: {e}"),
    }
    let (v, elapsed) = scenarios::concurrent_flush_race();
    println!("condvar queue: the consumer got {v} after {elapsed:?}");
}

fn timeout() {
    let queue = ConcurrentQueue::<u64>::new();
    let start = Instant::now();
    let got = queue.pop_timeout(Duration::from_millis(100));
    println!("pop_timeout(100ms) on an empty queue: {got:?} after {:?}", start.elapsed());
}

/// Log records to stderr, filtered by [LOG_ENV]
struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!(
                "[{:<5} {}] {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

fn init_logger() -> Result<(), String> {
    let level = match var(LOG_ENV) {
        Ok(level) => LevelFilter::from_str(&level).map_err(|e| format!("{LOG_ENV}={level}: {e}"))?,
        Err(_) => LevelFilter::Info,
    };
    // the logger lives as long as the program
    let logger: &'static StderrLogger = Box::leak(Box::new(StderrLogger { level }));
    log::set_logger(logger).map_err(|e| e.to_string())?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_workload_args() {
        assert_eq!(workload(None, None), Ok(Workload::default()));
        assert_eq!(
            workload(Some("4".to_string()), Some("10".to_string())),
            Ok(Workload {
                threads: 4,
                iterations: 10
            })
        );
        assert!(workload(Some("four".to_string()), None).is_err());
        // the total has to fit into usize
        let huge = usize::MAX.to_string();
        assert!(workload(Some(huge.clone()), Some("2".to_string())).is_err());
        assert!(workload(Some(huge), Some("1".to_string())).is_ok());
    }
}
