// ── Correlation contexts ──
//
// Stacks of causal contexts, one per tokio task (or per thread outside
// the runtime). Opening one returns a guard; the context lives exactly
// as long as the guard. Nested guards record the innermost open context
// of the same task as their parent so the records of a reconnection
// cycle, the connect call inside it, and every retry of that call share
// lineage, while concurrent tasks never adopt each other's contexts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationContext {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub operation: String,
    pub start_time: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
}

/// Whose stack a context lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Scope {
    Task(tokio::task::Id),
    Thread(ThreadId),
}

impl Scope {
    fn current() -> Self {
        tokio::task::try_id().map_or_else(|| Self::Thread(std::thread::current().id()), Self::Task)
    }
}

#[derive(Debug, Default)]
pub struct CorrelationTracker {
    stacks: DashMap<Scope, Vec<CorrelationContext>>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a context nested under the calling task's innermost open one.
    pub fn begin(
        self: &Arc<Self>,
        operation: impl Into<String>,
        tags: impl IntoIterator<Item = (String, String)>,
    ) -> CorrelationGuard {
        let parent_id = self.current().map(|c| c.id);
        self.open(operation.into(), parent_id, tags.into_iter().collect())
    }

    /// The calling task's innermost open context, if any.
    pub fn current(&self) -> Option<CorrelationContext> {
        self.stacks
            .get(&Scope::current())
            .and_then(|stack| stack.last().cloned())
    }

    /// Open contexts on the calling task.
    pub fn depth(&self) -> usize {
        self.stacks.get(&Scope::current()).map_or(0, |stack| stack.len())
    }

    fn open(
        self: &Arc<Self>,
        operation: String,
        parent_id: Option<Uuid>,
        tags: BTreeMap<String, String>,
    ) -> CorrelationGuard {
        let context = CorrelationContext {
            id: Uuid::new_v4(),
            parent_id,
            operation,
            start_time: Utc::now(),
            tags,
        };

        let span = tracing::debug_span!(
            "correlation",
            correlation_id = %context.id,
            parent_id = ?context.parent_id,
            operation = %context.operation,
        );

        let scope = Scope::current();
        self.stacks.entry(scope).or_default().push(context.clone());

        CorrelationGuard {
            tracker: Arc::clone(self),
            scope,
            context,
            span,
        }
    }

    fn close(&self, scope: Scope, id: Uuid) {
        if let Some(mut stack) = self.stacks.get_mut(&scope) {
            // Guards usually drop innermost-first, but not always.
            if let Some(pos) = stack.iter().rposition(|c| c.id == id) {
                stack.remove(pos);
            }
        }
        self.stacks.remove_if(&scope, |_, stack| stack.is_empty());
    }
}

/// Owns one open [`CorrelationContext`]; dropping it closes the context.
#[derive(Debug)]
#[must_use = "the correlation context closes as soon as the guard is dropped"]
pub struct CorrelationGuard {
    tracker: Arc<CorrelationTracker>,
    scope: Scope,
    context: CorrelationContext,
    span: tracing::Span,
}

impl CorrelationGuard {
    pub fn id(&self) -> Uuid {
        self.context.id
    }

    pub fn context(&self) -> &CorrelationContext {
        &self.context
    }

    /// Span carrying the correlation fields; instrument futures with it.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Open a child context with this one as explicit parent, regardless
    /// of what else is open. Works from any task.
    pub fn child(&self, operation: impl Into<String>) -> CorrelationGuard {
        self.tracker
            .open(operation.into(), Some(self.context.id), BTreeMap::new())
    }

    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.context.start_time)
            .to_std()
            .unwrap_or_default()
    }
}

impl Drop for CorrelationGuard {
    fn drop(&mut self) {
        self.tracker.close(self.scope, self.context.id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    #[test]
    fn nested_contexts_link_to_parent() {
        let tracker = Arc::new(CorrelationTracker::new());
        let outer = tracker.begin("reconnect", []);
        let inner = tracker.begin("connect", [("attempt".into(), "1".into())]);

        assert_eq!(inner.context().parent_id, Some(outer.id()));
        assert_eq!(inner.context().tags.get("attempt").unwrap(), "1");
        assert_eq!(tracker.current().unwrap().id, inner.id());
        assert_eq!(tracker.depth(), 2);
    }

    #[test]
    fn dropping_guard_pops_context() {
        let tracker = Arc::new(CorrelationTracker::new());
        let outer = tracker.begin("outer", []);
        {
            let _inner = tracker.begin("inner", []);
            assert_eq!(tracker.depth(), 2);
        }
        assert_eq!(tracker.depth(), 1);
        assert_eq!(tracker.current().unwrap().id, outer.id());
        drop(outer);
        assert!(tracker.current().is_none());
    }

    #[test]
    fn out_of_order_drop_removes_the_right_context() {
        let tracker = Arc::new(CorrelationTracker::new());
        let a = tracker.begin("a", []);
        let b = tracker.begin("b", []);
        let b_id = b.id();
        drop(a);
        assert_eq!(tracker.depth(), 1);
        assert_eq!(tracker.current().unwrap().id, b_id);
    }

    #[test]
    fn child_uses_explicit_parent() {
        let tracker = Arc::new(CorrelationTracker::new());
        let a = tracker.begin("a", []);
        let _unrelated = tracker.begin("b", []);
        let child = a.child("a.child");
        assert_eq!(child.context().parent_id, Some(a.id()));
    }

    #[tokio::test]
    async fn concurrent_tasks_do_not_share_parents() {
        let tracker = Arc::new(CorrelationTracker::new());
        let (opened_tx, opened_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let t = Arc::clone(&tracker);
        let holder = tokio::spawn(async move {
            let guard = t.begin("reconnect.cycle", []);
            opened_tx.send(guard.id()).unwrap();
            // Held open across an await point.
            release_rx.await.unwrap();
            assert_eq!(t.current().unwrap().id, guard.id());
        });
        let held_id = opened_rx.await.unwrap();

        let t = Arc::clone(&tracker);
        let other = tokio::spawn(async move {
            let guard = t.begin("comment.process", []);
            let parent = guard.context().parent_id;
            let depth = t.depth();
            (parent, depth)
        });
        let (parent, depth) = other.await.unwrap();
        assert_eq!(parent, None);
        assert_eq!(depth, 1);

        release_tx.send(()).unwrap();
        holder.await.unwrap();
        assert!(tracker.stacks.is_empty());
        assert_ne!(Some(held_id), parent);
    }

    #[tokio::test]
    async fn child_links_across_tasks_and_closes_on_its_own_stack() {
        let tracker = Arc::new(CorrelationTracker::new());
        let root = tracker.begin("reconnect.cycle", []);
        let child = root.child("connect");

        let handle = tokio::spawn(async move {
            let parent = child.context().parent_id;
            drop(child);
            parent
        });
        assert_eq!(handle.await.unwrap(), Some(root.id()));
        assert_eq!(tracker.depth(), 1);
        drop(root);
        assert!(tracker.stacks.is_empty());
    }
}
