#[cfg(test)]
mod tests {
    use caserun_core::error::ExecutorError;
    use caserun_core::registry::{CancelSignal, OwnedProcess, TaskRegistry};
    use caserun_core::task::TaskId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct FakeProcess {
        pid: u32,
        label: String,
        terminated: AtomicUsize,
    }

    impl FakeProcess {
        fn new(pid: u32) -> Arc<Self> {
            Arc::new(Self {
                pid,
                label: format!("fake-{}", pid),
                terminated: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl OwnedProcess for FakeProcess {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        fn label(&self) -> &str {
            &self.label
        }

        async fn terminate(&self) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_register_and_drop_removes_entry() {
        let registry = Arc::new(TaskRegistry::new(4));
        let id = TaskId::from("T1");

        let registration = registry.register(&id).unwrap();
        assert!(registry.lookup(&id).is_some());
        assert_eq!(registry.len(), 1);

        drop(registration);
        assert!(registry.lookup(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let registry = Arc::new(TaskRegistry::new(4));
        let id = TaskId::from("T1");
        let _first = registry.register(&id).unwrap();

        match registry.register(&id) {
            Err(ExecutorError::TaskAlreadyRunning(t)) => assert_eq!(t, "T1"),
            other => panic!("expected TaskAlreadyRunning, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_capacity_enforced() {
        let registry = Arc::new(TaskRegistry::new(2));
        let _a = registry.register(&TaskId::from("a")).unwrap();
        let b = registry.register(&TaskId::from("b")).unwrap();

        assert!(matches!(
            registry.register(&TaskId::from("c")),
            Err(ExecutorError::CapacityExceeded { running: 2, limit: 2 })
        ));

        drop(b);
        assert!(registry.register(&TaskId::from("c")).is_ok());
    }

    #[test]
    fn test_stale_registration_does_not_remove_newer_entry() {
        let registry = Arc::new(TaskRegistry::new(4));
        let id = TaskId::from("reused");

        let old = registry.register(&id).unwrap();
        assert!(registry.unregister(&id));
        let new = registry.register(&id).unwrap();

        drop(old);
        let live = registry.lookup(&id).expect("newer entry survives");
        assert!(Arc::ptr_eq(&live, new.state()));
    }

    #[tokio::test]
    async fn test_cancel_terminates_tracked_processes_and_is_idempotent() {
        let registry = Arc::new(TaskRegistry::new(4));
        let id = TaskId::from("T-cancel");
        let registration = registry.register(&id).unwrap();
        let state = Arc::clone(registration.state());

        let p1 = FakeProcess::new(101);
        let p2 = FakeProcess::new(102);
        let _t1 = state.track(p1.clone());
        let _t2 = state.track(p2.clone());
        assert_eq!(state.active_pids(), vec![101, 102]);

        assert!(registry.cancel(&id).await);
        assert!(state.is_cancelled());
        assert_eq!(p1.terminated.load(Ordering::SeqCst), 1);
        assert_eq!(p2.terminated.load(Ordering::SeqCst), 1);

        // Second cancel still reports the live entry and does not panic.
        assert!(registry.cancel(&id).await);
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_returns_false() {
        let registry = Arc::new(TaskRegistry::new(4));
        assert!(!registry.cancel(&TaskId::from("nope")).await);
    }

    #[tokio::test]
    async fn test_untracked_process_not_terminated() {
        let registry = Arc::new(TaskRegistry::new(4));
        let id = TaskId::from("T2");
        let registration = registry.register(&id).unwrap();
        let state = Arc::clone(registration.state());

        let p = FakeProcess::new(7);
        drop(state.track(p.clone()));
        assert_eq!(state.active_process_count(), 0);

        registry.cancel(&id).await;
        assert_eq!(p.terminated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_signal_wakes_waiter() {
        let registry = Arc::new(TaskRegistry::new(4));
        let id = TaskId::from("T3");
        let registration = registry.register(&id).unwrap();
        let mut signal = registration.state().cancel_signal();

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.cancel(&id).await;
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
    }

    #[tokio::test]
    async fn test_never_signal_stays_pending() {
        let mut signal = CancelSignal::never();
        assert!(!signal.is_cancelled());
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_concurrent_register_and_drop() {
        let registry = Arc::new(TaskRegistry::new(64));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for round in 0..50 {
                        let id = TaskId::from(format!("t{}-{}", i, round).as_str());
                        let reg = registry.register(&id).unwrap();
                        assert!(registry.lookup(&id).is_some());
                        drop(reg);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
