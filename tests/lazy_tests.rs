use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use refresh_cache::{Error, LazyRefreshCache, LoadFunction, error_fn, load_fn};

const INTERVAL: Duration = Duration::from_millis(50);

/// Loader returning how many times it has been called before.
fn counting_loader(calls: Arc<AtomicUsize>) -> LoadFunction<usize> {
	load_fn(move |_| Ok(calls.fetch_add(1, Ordering::SeqCst)))
}

/// Route log output to the test harness; set `RUST_LOG=refresh_cache=debug` to see it.
fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// Poll `cond` until it holds or `timeout` passes.
fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
	let deadline = Instant::now() + timeout;
	while Instant::now() < deadline {
		if cond() {
			return true;
		}
		thread::sleep(Duration::from_millis(5));
	}
	cond()
}

#[test]
fn test_values_readable_after_init() {
	let cache = LazyRefreshCache::init(
		load_fn(|key| Ok(format!("value-{key}"))),
		None,
		Duration::from_secs(60),
		["a", "b"],
	)
	.unwrap();

	assert_eq!(cache.get_clone("a").as_deref(), Some("value-a"));
	assert_eq!(cache.get_clone("b").as_deref(), Some("value-b"));
	assert!(cache.get("c").is_none());

	let mut keys = cache.keys();
	keys.sort();
	assert_eq!(keys, vec!["a", "b"]);
	cache.shutdown();
}

#[test]
fn test_init_fails_on_first_load_error() {
	let result = LazyRefreshCache::init(
		load_fn(|key| if key == "broken" { Err("backend down".into()) } else { Ok(1u8) }),
		None,
		Duration::from_secs(60),
		["fine", "broken"],
	);

	let err = match result {
		Err(err) => err,
		Ok(_) => panic!("init should fail"),
	};
	assert!(matches!(err, Error::InitialLoad(ref errors) if errors.len() == 1));
	assert_eq!(err.failed_keys(), vec!["broken"]);
	assert!(err.to_string().contains("broken"));
}

#[test]
fn test_add_cache_reports_each_failed_key() {
	let cache = LazyRefreshCache::init(
		load_fn(|key| if key.starts_with('x') { Err(format!("no {key}").into()) } else { Ok(key.len()) }),
		None,
		Duration::from_secs(60),
		Vec::<String>::new(),
	)
	.unwrap();

	let errors = cache.add_cache(None, None, ["x1", "ok", "x2"]);

	let failed: Vec<_> = errors.iter().map(|e| e.key.as_str()).collect();
	assert_eq!(failed, vec!["x1", "x2"]);
	assert_eq!(errors[0].source.to_string(), "no x1");
	assert_eq!(cache.get_clone("ok"), Some(2));
	assert!(cache.get("x1").is_none());
	assert!(cache.get("x2").is_none());
	cache.shutdown();
}

#[test]
fn test_failed_key_can_be_added_later() {
	let healthy = Arc::new(AtomicBool::new(false));
	let flag = healthy.clone();
	let cache = LazyRefreshCache::builder()
		.loader(load_fn(move |_| if flag.load(Ordering::SeqCst) { Ok(1u32) } else { Err("not yet".into()) }))
		.interval(Duration::from_secs(60))
		.build()
		.unwrap();

	assert!(cache.add_key("late").is_err());
	assert!(cache.get("late").is_none());

	healthy.store(true, Ordering::SeqCst);
	assert!(cache.add_key("late").is_ok());
	assert_eq!(cache.get_clone("late"), Some(1));
	cache.shutdown();
}

#[test]
fn test_refresh_advances_each_interval() {
	let calls = Arc::new(AtomicUsize::new(0));
	let cache = LazyRefreshCache::init(counting_loader(calls.clone()), None, INTERVAL, ["k"]).unwrap();

	assert_eq!(cache.get_clone("k"), Some(0));
	assert!(wait_until(INTERVAL * 20, || cache.get_clone("k") >= Some(1)));
	assert!(wait_until(INTERVAL * 20, || cache.get_clone("k") >= Some(3)));
	cache.shutdown();
}

#[test]
fn test_first_value_then_refreshed_value() {
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = calls.clone();
	let interval = Duration::from_millis(200);
	let cache = LazyRefreshCache::init(
		load_fn(move |_| {
			let value = if counter.fetch_add(1, Ordering::SeqCst) == 0 { "v1" } else { "v2" };
			Ok(value.to_string())
		}),
		None,
		interval,
		["x"],
	)
	.unwrap();

	assert_eq!(cache.get_clone("x").as_deref(), Some("v1"));
	thread::sleep(interval / 4);
	assert_eq!(cache.get_clone("x").as_deref(), Some("v1"));

	assert!(wait_until(interval * 10, || cache.get_clone("x").as_deref() == Some("v2")));
	cache.shutdown();
}

#[test]
fn test_concurrent_add_starts_single_loop() {
	init_tracing();
	let calls = Arc::new(AtomicUsize::new(0));
	let cache = Arc::new(
		LazyRefreshCache::builder()
			.loader(counting_loader(calls.clone()))
			.interval(INTERVAL)
			.build()
			.unwrap(),
	);

	let threads = 8;
	let barrier = Arc::new(Barrier::new(threads));
	let handles: Vec<_> = (0..threads)
		.map(|_| {
			let cache = cache.clone();
			let barrier = barrier.clone();
			thread::spawn(move || {
				barrier.wait();
				assert!(cache.add_cache(None, None, ["shared"]).is_empty());
				assert!(cache.get("shared").is_some());
			})
		})
		.collect();

	for handle in handles {
		handle.join().unwrap();
	}

	let metrics = cache.metrics();
	assert_eq!(metrics.loads, 1);
	assert_eq!(metrics.workers, 1);

	let elapsed = INTERVAL * 6;
	thread::sleep(elapsed);
	cache.shutdown();

	// One loop refreshes about elapsed/interval times; eight would do ~8x that.
	let refreshes = cache.metrics().refreshes;
	assert!(refreshes >= 1);
	assert!(refreshes <= 8, "too many refreshes: {refreshes}");
}

#[test]
fn test_concurrent_add_loads_once_with_slow_loader() {
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = calls.clone();
	let cache = Arc::new(
		LazyRefreshCache::builder()
			.loader(load_fn(move |_| {
				counter.fetch_add(1, Ordering::SeqCst);
				thread::sleep(Duration::from_millis(50));
				Ok("loaded".to_string())
			}))
			.interval(Duration::from_secs(60))
			.build()
			.unwrap(),
	);

	let threads = 16;
	let barrier = Arc::new(Barrier::new(threads));
	let handles: Vec<_> = (0..threads)
		.map(|_| {
			let cache = cache.clone();
			let barrier = barrier.clone();
			thread::spawn(move || {
				barrier.wait();
				let errors = cache.add_cache(None, None, ["shared"]);
				(errors.is_empty(), cache.get_clone("shared"))
			})
		})
		.collect();

	for handle in handles {
		let (ok, value) = handle.join().unwrap();
		assert!(ok);
		assert_eq!(value.as_deref(), Some("loaded"));
	}

	assert_eq!(calls.load(Ordering::SeqCst), 1);
	let metrics = cache.metrics();
	assert_eq!(metrics.loads, 1);
	assert_eq!(metrics.workers, 1);
	cache.shutdown();
}

#[test]
fn test_concurrent_add_shares_first_load_failure() {
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = calls.clone();
	let cache = Arc::new(
		LazyRefreshCache::<u32>::builder()
			.loader(load_fn(move |_| {
				counter.fetch_add(1, Ordering::SeqCst);
				thread::sleep(Duration::from_millis(50));
				Err("backend down".into())
			}))
			.interval(Duration::from_secs(60))
			.build()
			.unwrap(),
	);

	let threads = 8;
	let barrier = Arc::new(Barrier::new(threads));
	let handles: Vec<_> = (0..threads)
		.map(|_| {
			let cache = cache.clone();
			let barrier = barrier.clone();
			thread::spawn(move || {
				barrier.wait();
				cache.add_key("shared")
			})
		})
		.collect();

	for handle in handles {
		let err = handle.join().unwrap().unwrap_err();
		assert_eq!(err.key, "shared");
		assert_eq!(err.source.to_string(), "backend down");
	}

	// Callers that arrived after the failure may retry, so allow a few loads.
	assert!((1..=threads).contains(&calls.load(Ordering::SeqCst)));
	assert!(cache.get("shared").is_none());
	assert_eq!(cache.metrics().workers, 0);
	cache.shutdown();
}

#[test]
fn test_unbounded_interval_shuts_down_cleanly() {
	let calls = Arc::new(AtomicUsize::new(0));
	let cache = LazyRefreshCache::init(counting_loader(calls.clone()), None, Duration::MAX, ["k"]).unwrap();

	assert_eq!(cache.get_clone("k"), Some(0));
	thread::sleep(INTERVAL);

	let start = Instant::now();
	cache.shutdown();
	assert!(start.elapsed() < Duration::from_secs(5));
	assert_eq!(calls.load(Ordering::SeqCst), 1);
	assert_eq!(cache.metrics().refreshes, 0);
}

#[test]
fn test_failing_refresh_keeps_last_value() {
	init_tracing();
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = calls.clone();
	let reported = Arc::new(Mutex::new(Vec::new()));
	let sink = reported.clone();

	let cache = LazyRefreshCache::builder()
		.loader(load_fn(move |_| match counter.fetch_add(1, Ordering::SeqCst) {
			0 => Ok("good".to_string()),
			_ => Err("upstream unavailable".into()),
		}))
		.on_error(error_fn(move |key, err| sink.lock().push((key.to_string(), err.to_string()))))
		.interval(INTERVAL)
		.key("cfg")
		.build()
		.unwrap();

	assert!(wait_until(INTERVAL * 40, || reported.lock().len() >= 3));
	assert_eq!(cache.get_clone("cfg").as_deref(), Some("good"));

	cache.shutdown();
	let reported = reported.lock();
	assert!(reported.iter().all(|(key, err)| key == "cfg" && err == "upstream unavailable"));
	assert_eq!(reported.len() as u64, cache.metrics().refresh_failures);
}

#[test]
fn test_per_call_loader_and_reporter_override() {
	let default_errors = Arc::new(AtomicUsize::new(0));
	let override_errors = Arc::new(AtomicUsize::new(0));
	let default_sink = default_errors.clone();
	let override_sink = override_errors.clone();
	let override_calls = Arc::new(AtomicUsize::new(0));
	let counter = override_calls.clone();

	let cache = LazyRefreshCache::builder()
		.loader(load_fn(|_| Ok(0u32)))
		.on_error(error_fn(move |_, _| {
			default_sink.fetch_add(1, Ordering::SeqCst);
		}))
		.interval(INTERVAL)
		.build()
		.unwrap();

	let errors = cache.add_cache(
		Some(load_fn(move |_| match counter.fetch_add(1, Ordering::SeqCst) {
			0 => Ok(9u32),
			_ => Err("flaky".into()),
		})),
		Some(error_fn(move |_, _| {
			override_sink.fetch_add(1, Ordering::SeqCst);
		})),
		["special"],
	);
	assert!(errors.is_empty());
	assert_eq!(cache.get_clone("special"), Some(9));

	assert!(wait_until(INTERVAL * 40, || override_errors.load(Ordering::SeqCst) >= 2));
	cache.shutdown();
	assert_eq!(default_errors.load(Ordering::SeqCst), 0);
	assert_eq!(cache.get_clone("special"), Some(9));
}

#[test]
fn test_shutdown_stops_refreshing() {
	let calls = Arc::new(AtomicUsize::new(0));
	let cache = LazyRefreshCache::init(counting_loader(calls.clone()), None, INTERVAL, ["a", "b"]).unwrap();

	assert!(wait_until(INTERVAL * 20, || calls.load(Ordering::SeqCst) >= 4));
	cache.shutdown();
	assert!(cache.is_shut_down());

	let after = calls.load(Ordering::SeqCst);
	thread::sleep(INTERVAL * 4);
	assert_eq!(calls.load(Ordering::SeqCst), after);
	assert!(cache.get("a").is_some());
}

#[test]
fn test_drop_stops_refreshing() {
	let calls = Arc::new(AtomicUsize::new(0));
	let cache = LazyRefreshCache::init(counting_loader(calls.clone()), None, INTERVAL, ["a"]).unwrap();
	assert!(wait_until(INTERVAL * 20, || calls.load(Ordering::SeqCst) >= 2));

	drop(cache);
	// Allow an in-flight cycle to finish.
	thread::sleep(INTERVAL);
	let after = calls.load(Ordering::SeqCst);
	thread::sleep(INTERVAL * 4);
	assert_eq!(calls.load(Ordering::SeqCst), after);
}

#[test]
fn test_slow_loader_does_not_block_reads() {
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = calls.clone();
	let cache = LazyRefreshCache::init(
		load_fn(move |_| {
			if counter.fetch_add(1, Ordering::SeqCst) > 0 {
				thread::sleep(Duration::from_millis(300));
			}
			Ok(1u8)
		}),
		None,
		Duration::from_millis(10),
		["slow"],
	)
	.unwrap();

	assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) >= 2));

	// The loop is now inside a slow load; reads stay instant.
	let start = Instant::now();
	for _ in 0..1000 {
		assert_eq!(cache.get_clone("slow"), Some(1));
	}
	assert!(start.elapsed() < Duration::from_millis(250));
	cache.shutdown();
}
