//! The memoized function evaluator.
//!
//! An [`Evaluator`] wraps a store and interposes a call cache: invoking a
//! registered function on CID-keyed arguments first consults the store's
//! call bindings, and only runs the function on a miss. An in-process
//! in-flight table guarantees at most one concurrent computation per
//! (function, arguments) key; latecomers block on the winner's slot.
//!
//! The slot is released only when the computation finishes, so waiters
//! that give up never cancel it and the result still lands in the cache.
//! Function failures are delivered to current waiters but never cached.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;

use memodb_node::Cid;
use memodb_store::{Call, Name, Store};
use tracing::{debug, trace};

use crate::error::{EvalError, Result};
use crate::noderef::{NodeOrCid, NodeRef};

type Func = dyn Fn(&Evaluator, &mut [NodeRef]) -> Result<NodeOrCid> + Send + Sync;
type CallKey = (String, Vec<Cid>);

/// Outcome shared with waiters. Errors travel as rendered messages so the
/// slot stays cloneable.
type Outcome = std::result::Result<Cid, String>;

struct InFlight {
    outcome: Mutex<Option<Outcome>>,
    ready: Condvar,
}

impl InFlight {
    fn new() -> Self {
        InFlight {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, outcome: Outcome) {
        let mut slot = self.outcome.lock().expect("lock poisoned");
        *slot = Some(outcome);
        self.ready.notify_all();
    }

    fn wait(&self) -> Outcome {
        let mut slot = self.outcome.lock().expect("lock poisoned");
        loop {
            match slot.as_ref() {
                Some(outcome) => return outcome.clone(),
                None => slot = self.ready.wait(slot).expect("lock poisoned"),
            }
        }
    }
}

/// Memoized-call runtime over a store. Cheap to clone; clones share the
/// registry, the in-flight table, and the worker pool.
#[derive(Clone)]
pub struct Evaluator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    funcs: RwLock<HashMap<String, Arc<Func>>>,
    in_flight: Mutex<HashMap<CallKey, Arc<InFlight>>>,
    pool: WorkerPool,
}

impl Evaluator {
    /// An evaluator with one worker per available core.
    pub fn new(store: Arc<dyn Store>) -> Self {
        let threads = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        Self::with_threads(store, threads)
    }

    /// An evaluator with a fixed worker count (minimum one).
    pub fn with_threads(store: Arc<dyn Store>, threads: usize) -> Self {
        Evaluator {
            inner: Arc::new(Inner {
                store,
                funcs: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                pool: WorkerPool::new(threads.max(1)),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// Register `func` under `name`, replacing any previous registration.
    pub fn register<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(&Evaluator, &mut [NodeRef]) -> Result<NodeOrCid> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(func = name.as_str(), "registered function");
        self.inner
            .funcs
            .write()
            .expect("lock poisoned")
            .insert(name, Arc::new(func));
    }

    /// A handle for a node in this evaluator's store.
    pub fn node_ref(&self, value: impl Into<NodeOrCid>) -> NodeRef {
        NodeRef::new(Arc::clone(&self.inner.store), value.into())
    }

    /// Evaluate `func` on `args`, memoized. Returns a handle over the
    /// result CID; the cached binding is reused when present, and
    /// concurrent callers of the same key share one computation.
    pub fn evaluate(&self, func: &str, args: Vec<NodeRef>) -> Result<NodeRef> {
        let mut args = args;
        let mut arg_cids = Vec::with_capacity(args.len());
        for arg in &mut args {
            arg_cids.push(arg.cid()?.clone());
        }
        let call = Call::new(func, arg_cids.clone());

        if let Some(cid) = self
            .inner
            .store
            .resolve_optional(&Name::Call(call.clone()))?
        {
            trace!(func, "call cache hit");
            return Ok(NodeRef::from_cid(Arc::clone(&self.inner.store), cid));
        }

        let key: CallKey = (func.to_string(), arg_cids);
        let (slot, is_runner) = {
            let mut table = self.inner.in_flight.lock().expect("lock poisoned");
            match table.entry(key.clone()) {
                Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
                Entry::Vacant(entry) => {
                    let slot = Arc::new(InFlight::new());
                    entry.insert(Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if !is_runner {
            trace!(func, "waiting on in-flight computation");
            return match slot.wait() {
                Ok(cid) => Ok(NodeRef::from_cid(Arc::clone(&self.inner.store), cid)),
                Err(message) => Err(EvalError::Failed {
                    func: func.to_string(),
                    message,
                }),
            };
        }

        // We own the slot. The guard publishes a failure and clears the
        // table entry even if the function body panics, so waiters are
        // never stranded.
        let mut guard = SlotGuard {
            evaluator: self,
            key: &key,
            slot: &slot,
            completed: false,
        };

        // A previous runner may have published between our cache miss and
        // the claim; don't recompute what is already bound.
        if let Some(cid) = self
            .inner
            .store
            .resolve_optional(&Name::Call(call.clone()))?
        {
            guard.finish(Ok(cid.clone()));
            return Ok(NodeRef::from_cid(Arc::clone(&self.inner.store), cid));
        }

        let outcome = self.compute(func, &call, &mut args);
        guard.finish(match &outcome {
            Ok(cid) => Ok(cid.clone()),
            Err(e) => Err(e.to_string()),
        });
        outcome.map(|cid| NodeRef::from_cid(Arc::clone(&self.inner.store), cid))
    }

    /// Submit an evaluation to the worker pool, returning a future-like
    /// handle. The computation proceeds even if the handle is dropped.
    pub fn evaluate_async(&self, func: &str, args: Vec<NodeRef>) -> EvalFuture {
        let slot = Arc::new(InFlight::new());
        let task_slot = Arc::clone(&slot);
        let evaluator = self.clone();
        let func_owned = func.to_string();
        self.inner.pool.execute(move || {
            let outcome = evaluator
                .evaluate(&func_owned, args)
                .and_then(|mut node_ref| Ok(node_ref.cid()?.clone()));
            task_slot.complete(outcome.map_err(|e| e.to_string()));
        });
        EvalFuture {
            func: func.to_string(),
            store: Arc::clone(&self.inner.store),
            slot,
        }
    }

    fn compute(&self, func: &str, call: &Call, args: &mut [NodeRef]) -> Result<Cid> {
        let registered = self
            .inner
            .funcs
            .read()
            .expect("lock poisoned")
            .get(func)
            .cloned();
        let f = registered.ok_or_else(|| EvalError::Unregistered(func.to_string()))?;

        trace!(func, "running function");
        let produced = f(self, args)?;
        let cid = match produced {
            NodeOrCid::Cid(cid) => cid,
            NodeOrCid::Node(node) => self.inner.store.put(&node)?,
        };
        self.inner.store.set(&Name::Call(call.clone()), &cid)?;
        debug!(func, result = %cid, "cached call result");
        Ok(cid)
    }
}

/// Publishes an outcome and releases the in-flight slot exactly once,
/// including on unwind out of a function body.
struct SlotGuard<'a> {
    evaluator: &'a Evaluator,
    key: &'a CallKey,
    slot: &'a Arc<InFlight>,
    completed: bool,
}

impl SlotGuard<'_> {
    fn finish(&mut self, outcome: Outcome) {
        self.slot.complete(outcome);
        self.evaluator
            .inner
            .in_flight
            .lock()
            .expect("lock poisoned")
            .remove(self.key);
        self.completed = true;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.finish(Err("computation did not complete".to_string()));
        }
    }
}

/// Handle for a pooled evaluation.
pub struct EvalFuture {
    func: String,
    store: Arc<dyn Store>,
    slot: Arc<InFlight>,
}

impl EvalFuture {
    /// Block until the evaluation finishes.
    pub fn wait(self) -> Result<NodeRef> {
        match self.slot.wait() {
            Ok(cid) => Ok(NodeRef::from_cid(self.store, cid)),
            Err(message) => Err(EvalError::Failed {
                func: self.func,
                message,
            }),
        }
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// Fixed-size worker pool fed by a shared channel. Dropping the pool
/// closes the channel and joins the workers.
struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn new(threads: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..threads)
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                std::thread::Builder::new()
                    .name(format!("memodb-eval-{index}"))
                    .spawn(move || loop {
                        let job = receiver.lock().expect("lock poisoned").recv();
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
                    .expect("spawn worker thread")
            })
            .collect();
        WorkerPool {
            sender: Some(sender),
            workers,
        }
    }

    fn execute(&self, job: impl FnOnce() + Send + 'static) {
        self.sender
            .as_ref()
            .expect("pool running")
            .send(Box::new(job))
            .expect("worker threads alive");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.sender.take());
        let current = std::thread::current().id();
        for worker in self.workers.drain(..) {
            // A pooled job may hold the last evaluator clone, making this
            // drop run on a worker; that thread must not join itself.
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memodb_node::Node;
    use memodb_store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn evaluator() -> Evaluator {
        Evaluator::with_threads(Arc::new(MemoryStore::new()), 2)
    }

    fn register_double(eval: &Evaluator) -> Arc<AtomicUsize> {
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invocations);
        eval.register("double", move |_eval, args| {
            counter.fetch_add(1, Ordering::SeqCst);
            let n = args[0]
                .node()?
                .as_i64()
                .ok_or_else(|| EvalError::failure("double", "argument is not an integer"))?;
            Ok(NodeOrCid::Node(Node::Int(2 * n)))
        });
        invocations
    }

    #[test]
    fn evaluate_computes_and_memoizes() {
        let eval = evaluator();
        let invocations = register_double(&eval);

        let mut result = eval
            .evaluate("double", vec![eval.node_ref(Node::Int(3))])
            .unwrap();
        assert_eq!(result.node().unwrap(), &Node::Int(6));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        // The call binding is persisted in the store.
        let arg_cid = eval.store().put(&Node::Int(3)).unwrap();
        let call = Call::new("double", vec![arg_cid]);
        let cached = eval
            .store()
            .resolve(&Name::Call(call))
            .unwrap();
        assert_eq!(&cached, result.cid().unwrap());

        // Second evaluation is served from the cache.
        let mut again = eval
            .evaluate("double", vec![eval.node_ref(Node::Int(3))])
            .unwrap();
        assert_eq!(again.node().unwrap(), &Node::Int(6));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cached_calls_serve_without_registration() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        {
            let eval = Evaluator::with_threads(Arc::clone(&store), 1);
            register_double(&eval);
            eval.evaluate("double", vec![eval.node_ref(Node::Int(3))])
                .unwrap();
        }
        // Fresh evaluator, nothing registered: the cache still answers.
        let eval = Evaluator::with_threads(store, 1);
        let mut result = eval
            .evaluate("double", vec![eval.node_ref(Node::Int(3))])
            .unwrap();
        assert_eq!(result.node().unwrap(), &Node::Int(6));
    }

    #[test]
    fn unregistered_function_is_an_error() {
        let eval = evaluator();
        let err = eval
            .evaluate("nope", vec![eval.node_ref(Node::Int(1))])
            .unwrap_err();
        assert!(matches!(err, EvalError::Unregistered(_)));
    }

    #[test]
    fn concurrent_evaluations_share_one_computation() {
        let eval = Evaluator::with_threads(Arc::new(MemoryStore::new()), 8);
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invocations);
        eval.register("slow", move |_eval, args| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            let n = args[0].node()?.as_i64().unwrap_or(0);
            Ok(NodeOrCid::Node(Node::Int(n + 1)))
        });

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let eval = eval.clone();
                std::thread::spawn(move || {
                    let mut result = eval
                        .evaluate("slow", vec![eval.node_ref(Node::Int(10))])
                        .unwrap();
                    result.node().unwrap().clone()
                })
            })
            .collect();
        for thread in threads {
            assert_eq!(thread.join().unwrap(), Node::Int(11));
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn errors_are_not_cached() {
        let eval = evaluator();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        eval.register("flaky", move |_eval, args| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(EvalError::failure("flaky", "first attempt fails"));
            }
            let n = args[0].node()?.as_i64().unwrap_or(0);
            Ok(NodeOrCid::Node(Node::Int(n)))
        });

        let first = eval.evaluate("flaky", vec![eval.node_ref(Node::Int(1))]);
        assert!(matches!(first, Err(EvalError::Failed { .. })));

        // No call binding was recorded for the failure.
        let arg_cid = eval.store().put(&Node::Int(1)).unwrap();
        assert!(eval
            .store()
            .resolve_optional(&Name::Call(Call::new("flaky", vec![arg_cid])))
            .unwrap()
            .is_none());

        // The second attempt reruns the function and succeeds.
        let mut second = eval
            .evaluate("flaky", vec![eval.node_ref(Node::Int(1))])
            .unwrap();
        assert_eq!(second.node().unwrap(), &Node::Int(1));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn functions_may_return_cids() {
        let eval = evaluator();
        eval.register("store_big", |eval, _args| {
            let cid = eval.store().put(&Node::Bytes(vec![7; 128]))?;
            Ok(NodeOrCid::Cid(cid))
        });
        let mut result = eval
            .evaluate("store_big", vec![eval.node_ref(Node::Null)])
            .unwrap();
        assert_eq!(result.node().unwrap(), &Node::Bytes(vec![7; 128]));
    }

    #[test]
    fn functions_may_evaluate_recursively() {
        let eval = evaluator();
        register_double(&eval);
        eval.register("quadruple", |eval, args| {
            let once = eval.evaluate("double", vec![args[0].clone()])?;
            let mut twice = eval.evaluate("double", vec![once])?;
            twice.cid()?;
            Ok(NodeOrCid::Cid(twice.cid_if_known().unwrap().clone()))
        });
        let mut result = eval
            .evaluate("quadruple", vec![eval.node_ref(Node::Int(5))])
            .unwrap();
        assert_eq!(result.node().unwrap(), &Node::Int(20));
    }

    #[test]
    fn async_evaluation_completes() {
        let eval = evaluator();
        register_double(&eval);
        let future = eval.evaluate_async("double", vec![eval.node_ref(Node::Int(21))]);
        let mut result = future.wait().unwrap();
        assert_eq!(result.node().unwrap(), &Node::Int(42));
    }

    #[test]
    fn abandoned_async_evaluation_still_caches() {
        let eval = evaluator();
        let invocations = register_double(&eval);
        let future = eval.evaluate_async("double", vec![eval.node_ref(Node::Int(4))]);
        drop(future);

        // Wait for the pooled computation to land in the call cache.
        let arg_cid = eval.store().put(&Node::Int(4)).unwrap();
        let call = Name::Call(Call::new("double", vec![arg_cid]));
        for _ in 0..100 {
            if eval.store().resolve_optional(&call).unwrap().is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(eval.store().resolve_optional(&call).unwrap().is_some());
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }
}
