//! executive.rs
//! Demand-driven orchestration: dirty check, upstream-first broadcast of the
//! request phases and timestamp reconciliation once a run succeeded.

use super::policy::RevisitPolicy;
use super::{AlgorithmId, Pipeline, PortId};
use crate::error::{Outcome, PipelineError, PipelineResult};
use crate::analysis::topology;
use crate::information::{Information, UpdateOutputData};
use crate::object::Object;
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

/// Per-stage run state, created on first use.
#[derive(Debug, Clone, Default)]
pub struct Executive {
    object: Object,
    running: bool,
    consumed: u64,
}

impl Executive {
    pub fn timestamp(&self) -> u64 { self.object.timestamp() }
    pub fn modified(&mut self) { self.object.modified(); }
    pub fn is_running(&self) -> bool { self.running }

    /// Clock value when the update hooks last read the inputs.
    pub fn consumed(&self) -> u64 { self.consumed }

    pub(crate) fn mark_consumed(&mut self) { self.consumed = Object::now(); }
}

/// Keeps a stage flagged as running for as long as it lives.
struct RunningGuard<'a> {
    pipeline: &'a mut Pipeline,
    id: AlgorithmId,
}

impl<'a> RunningGuard<'a> {
    fn new(pipeline: &'a mut Pipeline, id: AlgorithmId) -> Self {
        pipeline.set_running(id, true);
        Self { pipeline, id }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.pipeline.set_running(self.id, false);
    }
}

impl Deref for RunningGuard<'_> {
    type Target = Pipeline;
    fn deref(&self) -> &Pipeline { self.pipeline }
}

impl DerefMut for RunningGuard<'_> {
    fn deref_mut(&mut self) -> &mut Pipeline { self.pipeline }
}

/// Stages seen during one broadcast pass.
#[derive(Debug, Default)]
struct Traversal {
    on_stack: HashSet<AlgorithmId>,
    done: HashSet<AlgorithmId>,
}

impl Pipeline {
    pub fn executive(&self, id: AlgorithmId) -> Option<&Executive> {
        self.stage(id).ok()?.executive.as_ref()
    }

    /// Executive of the stage, created if it does not exist yet.
    pub fn executive_mut(&mut self, id: AlgorithmId) -> Option<&mut Executive> {
        Some(self.stage_mut(id).ok()?.executive.get_or_insert_with(Executive::default))
    }

    pub fn executive_timestamp(&self, id: AlgorithmId) -> u64 {
        self.stage(id).map_or(0, |s| s.executive_timestamp())
    }

    pub fn is_running(&self, id: AlgorithmId) -> bool {
        self.stage(id).map_or(false, |s| s.is_running())
    }

    fn set_running(&mut self, id: AlgorithmId, running: bool) {
        if let Some(executive) = self.executive_mut(id) {
            executive.running = running;
        }
    }

    /// Brings the outputs of `id` up to date, running every stale stage
    /// upstream of it. A current pipeline returns without calling any hook.
    pub fn update(&mut self, id: AlgorithmId) -> Outcome {
        if !self.contains(id) {
            return Outcome::from(Err::<(), _>(PipelineError::UnknownAlgorithm(id)));
        }
        let mut guard = RunningGuard::new(self, id);
        if !guard.is_pipeline_modified(id) {
            tracing::trace!("Pipeline of {:?} is up to date", id);
            return Outcome::Success;
        }
        let passes = [
            Information::request(true, false, false),
            Information::request(false, true, false),
            Information::request(false, false, true),
        ];
        let result = passes.iter().try_for_each(|request| guard.broadcast(id, request));
        if result.is_ok() {
            guard.update_pipeline_timestamp(id);
        }
        Outcome::from(result)
    }

    /// True when an input of `id` changed since its last run, when a stage
    /// upstream reports the same, or when `id` itself was modified.
    pub fn is_pipeline_modified(&self, id: AlgorithmId) -> bool {
        self.pipeline_modified(id, &mut HashSet::new())
    }

    fn pipeline_modified(&self, id: AlgorithmId, seen: &mut HashSet<AlgorithmId>) -> bool {
        if !seen.insert(id) {
            return false;
        }
        let Ok(stage) = self.stage(id) else { return false };
        let stamp = stage.executive_timestamp();
        for upstream in stage.upstream_ports() {
            if self.source_timestamp(upstream) > stamp {
                return true;
            }
            let peer = upstream.algorithm;
            if !self.is_running(peer) && self.pipeline_modified(peer, seen) {
                return true;
            }
        }
        stage.object.timestamp() > stamp
    }

    /// Sends `request` to every stage upstream of `id`, depth first, then to
    /// `id`. Stops at the first failure.
    pub fn send_request(&mut self, id: AlgorithmId, request: &Information) -> Outcome {
        Outcome::from(self.broadcast(id, request))
    }

    fn broadcast(&mut self, id: AlgorithmId, request: &Information) -> PipelineResult<()> {
        self.broadcast_from(id, request, &mut Traversal::default())
    }

    fn broadcast_from(&mut self, id: AlgorithmId, request: &Information, trail: &mut Traversal) -> PipelineResult<()> {
        let once = self.policy().revisit == RevisitPolicy::OncePerPass;
        let upstream: Vec<AlgorithmId> = self.stage(id)?.upstream_ports().map(|p| p.algorithm).collect();

        trail.on_stack.insert(id);
        let mut result = Ok(());
        for peer in upstream {
            if self.is_running(peer) || trail.on_stack.contains(&peer) || (once && trail.done.contains(&peer)) {
                continue;
            }
            result = self.broadcast_from(peer, request, trail);
            if result.is_err() {
                break;
            }
        }
        trail.on_stack.remove(&id);
        result?;

        // Update hooks run at most once per pass, whatever the policy.
        if !trail.done.insert(id) && request.get::<UpdateOutputData>() {
            let mut rest = request.clone();
            rest.unset::<UpdateOutputData>();
            return self.try_process_request(id, &rest);
        }
        self.try_process_request(id, request)
    }

    /// Marks `id` and its upstream stages as current after a successful run,
    /// and stamps output ports whose data changed.
    ///
    /// A stage is brought current when the stage itself changed, or when an
    /// input changed and its data was consumed as is. Input data rewritten
    /// after the hooks read it (a feedback loop) keeps the stage dirty.
    pub fn update_pipeline_timestamp(&mut self, id: AlgorithmId) {
        self.reconcile(id, &mut HashSet::new());
    }

    /// True when `upstream` carries data produced by `id` itself: the port
    /// belongs to a stage downstream of `id`, or shares slices with one of
    /// the outputs of `id`.
    fn feeds_back(&self, id: AlgorithmId, upstream: PortId) -> bool {
        if topology::downstream_from(self, &[id]).contains(&upstream.algorithm) {
            return true;
        }
        let Ok(stage) = self.stage(id) else { return false };
        let Some(root) = self.port_data(upstream) else { return false };
        let slices = self.nodes.children(root);
        stage
            .outputs
            .iter()
            .filter_map(|port| port.data())
            .any(|own| self.nodes.children(own).iter().any(|n| slices.contains(n)))
    }

    fn reconcile(&mut self, id: AlgorithmId, seen: &mut HashSet<AlgorithmId>) {
        if !seen.insert(id) {
            return;
        }
        let upstream: Vec<PortId> = match self.stage(id) {
            Ok(stage) => stage.upstream_ports().collect(),
            Err(_) => return,
        };
        for port in &upstream {
            if !self.is_running(port.algorithm) {
                self.reconcile(port.algorithm, seen);
            }
        }

        let (stamp, consumed) = self.executive(id).map_or((0, 0), |e| (e.timestamp(), e.consumed()));
        let stale_input = upstream.iter().any(|p| self.source_timestamp(*p) > stamp);
        let fed_back = upstream
            .iter()
            .filter(|p| self.port_data(**p).map_or(false, |root| self.nodes.timestamp(root) > consumed))
            .any(|p| self.feeds_back(id, *p));
        let Ok((stage, nodes)) = self.split(id) else { return };
        if stage.object.timestamp() > stamp || (stale_input && !fed_back) {
            stage.object.modified();
            stage.executive.get_or_insert_with(Executive::default).modified();
        }
        for port in stage.outputs.iter_mut() {
            if port.data().map_or(false, |root| nodes.timestamp(root) > port.timestamp()) {
                port.modified();
            }
        }
    }
}
