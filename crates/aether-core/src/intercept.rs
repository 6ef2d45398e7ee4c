use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Stable handle returned by `Dispatcher::attach`. `0` is reserved to mean
/// "not attached" (§3).
pub type InterceptorId = u64;

pub const NOT_ATTACHED: InterceptorId = 0;

/// A generic, single event-family dispatcher (§4.F). One instance is
/// created per event family (`server`, `http`, `tunnel`, `tls`,
/// `ssl_certificate`, `websocket`, `websocket_message`); `Event` is that
/// family's closed enum and `Ctx` is whatever context type the family's
/// callbacks need (usually a small struct bundling `&mut Flow` with
/// whatever else the event carries). Concrete `Ctx` types live above this
/// crate, alongside the `Flow` type they reference — this dispatcher only
/// needs `Event` to be a small `Copy + Eq + Hash` key.
///
/// Callbacks for the same event fire in insertion order. Detach by id is
/// `O(log n)` via the id→event side table.
pub struct Dispatcher<Event, Ctx: ?Sized> {
    next_id: InterceptorId,
    by_event: HashMap<Event, BTreeMap<InterceptorId, Box<dyn FnMut(&mut Ctx) + Send>>>,
    id_to_event: BTreeMap<InterceptorId, Event>,
}

impl<Event, Ctx: ?Sized> Default for Dispatcher<Event, Ctx> {
    fn default() -> Self {
        Self {
            next_id: NOT_ATTACHED + 1,
            by_event: HashMap::new(),
            id_to_event: BTreeMap::new(),
        }
    }
}

impl<Event, Ctx: ?Sized> Dispatcher<Event, Ctx>
where
    Event: Copy + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `event`, returning a stable non-zero id.
    pub fn attach<F>(&mut self, event: Event, callback: F) -> InterceptorId
    where
        F: FnMut(&mut Ctx) + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.by_event
            .entry(event)
            .or_default()
            .insert(id, Box::new(callback));
        self.id_to_event.insert(id, event);
        id
    }

    /// Removes the callback registered under `id`, if any.
    pub fn detach(&mut self, id: InterceptorId) {
        if let Some(event) = self.id_to_event.remove(&id) {
            if let Some(map) = self.by_event.get_mut(&event) {
                map.remove(&id);
            }
        }
    }

    /// Invokes every callback attached to `event`, in insertion order,
    /// synchronously on the calling thread.
    pub fn dispatch(&mut self, event: Event, ctx: &mut Ctx) {
        if let Some(map) = self.by_event.get_mut(&event) {
            for callback in map.values_mut() {
                callback(ctx);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_event.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Eq, PartialEq, Hash)]
    enum Ev {
        A,
        B,
    }

    #[test]
    fn fires_in_insertion_order() {
        let mut d: Dispatcher<Ev, Vec<i32>> = Dispatcher::new();
        d.attach(Ev::A, |v: &mut Vec<i32>| v.push(1));
        d.attach(Ev::A, |v: &mut Vec<i32>| v.push(2));
        d.attach(Ev::B, |v: &mut Vec<i32>| v.push(99));
        let mut out = Vec::new();
        d.dispatch(Ev::A, &mut out);
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn detach_removes_only_that_callback() {
        let mut d: Dispatcher<Ev, Vec<i32>> = Dispatcher::new();
        let id1 = d.attach(Ev::A, |v: &mut Vec<i32>| v.push(1));
        d.attach(Ev::A, |v: &mut Vec<i32>| v.push(2));
        d.detach(id1);
        let mut out = Vec::new();
        d.dispatch(Ev::A, &mut out);
        assert_eq!(out, vec![2]);
    }

    #[test]
    fn detach_is_idempotent_for_unknown_ids() {
        let mut d: Dispatcher<Ev, Vec<i32>> = Dispatcher::new();
        d.detach(12345);
        assert!(d.is_empty());
    }
}
