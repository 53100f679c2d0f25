use std::sync::Mutex;

use crate::Error;

pub(crate) type Hook = Box<dyn FnMut() + Send>;
pub(crate) type WriteHook = Box<dyn FnMut(usize) + Send>;
pub(crate) type DropHook = Box<dyn FnMut(&[u8]) + Send>;
pub(crate) type ErrorHook = Box<dyn FnMut(&Error) + Send>;

/// Per-signal observer registry.
///
/// Emission takes the registered callbacks out of the registry, runs them
/// with no lock held, and merges back any callbacks registered meanwhile, so
/// an observer may call back into the sink or register further observers.
///
/// `Ready` and `Error` are replayed to late registrations: the dispatch
/// thread may fire either before the producer has had a chance to register.
#[derive(Default)]
pub(crate) struct Observers {
    ready: Vec<Hook>,
    write: Vec<WriteHook>,
    drain: Vec<Hook>,
    dropped: Vec<DropHook>,
    error: Vec<ErrorHook>,
    finish: Vec<Hook>,
    closed: Vec<Hook>,
    /// Descriptor currently usable; replayed to late `on_ready` observers.
    ready_now: bool,
    /// Error raised while no error observer was registered.
    parked_error: Option<Error>,
}

impl Observers {
    fn fire(slot: &Mutex<Self>, pick: fn(&mut Observers) -> &mut Vec<Hook>) {
        let mut taken = match slot.lock() {
            Ok(mut guard) => std::mem::take(pick(&mut guard)),
            Err(_) => return,
        };
        for hook in taken.iter_mut() {
            hook();
        }
        if let Ok(mut guard) = slot.lock() {
            let vec = pick(&mut guard);
            taken.append(vec);
            *vec = taken;
        }
    }

    pub fn emit_ready(slot: &Mutex<Self>) {
        if let Ok(mut guard) = slot.lock() {
            guard.ready_now = true;
        }
        Self::fire(slot, |o| &mut o.ready);
    }

    pub fn emit_drain(slot: &Mutex<Self>) {
        Self::fire(slot, |o| &mut o.drain);
    }

    pub fn emit_finish(slot: &Mutex<Self>) {
        Self::fire(slot, |o| &mut o.finish);
    }

    pub fn emit_closed(slot: &Mutex<Self>) {
        if let Ok(mut guard) = slot.lock() {
            guard.ready_now = false;
        }
        Self::fire(slot, |o| &mut o.closed);
    }

    pub fn emit_write(slot: &Mutex<Self>, written: usize) {
        let mut taken = match slot.lock() {
            Ok(mut guard) => std::mem::take(&mut guard.write),
            Err(_) => return,
        };
        for hook in taken.iter_mut() {
            hook(written);
        }
        if let Ok(mut guard) = slot.lock() {
            taken.append(&mut guard.write);
            guard.write = taken;
        }
    }

    pub fn emit_dropped(slot: &Mutex<Self>, rejected: &[u8]) {
        let mut taken = match slot.lock() {
            Ok(mut guard) => std::mem::take(&mut guard.dropped),
            Err(_) => return,
        };
        for hook in taken.iter_mut() {
            hook(rejected);
        }
        if let Ok(mut guard) = slot.lock() {
            taken.append(&mut guard.dropped);
            guard.dropped = taken;
        }
    }

    pub fn emit_error(slot: &Mutex<Self>, err: &Error) {
        let mut taken = match slot.lock() {
            Ok(mut guard) => {
                if guard.error.is_empty() {
                    guard.parked_error = Some(err.duplicate());
                    return;
                }
                std::mem::take(&mut guard.error)
            }
            Err(_) => return,
        };
        for hook in taken.iter_mut() {
            hook(err);
        }
        if let Ok(mut guard) = slot.lock() {
            taken.append(&mut guard.error);
            guard.error = taken;
        }
    }

    pub fn add_ready(slot: &Mutex<Self>, mut hook: Hook) {
        if let Ok(mut guard) = slot.lock() {
            if !guard.ready_now {
                // Registered under the lock, so a concurrent emission either
                // waits and takes this hook or already replayed above.
                guard.ready.push(hook);
                return;
            }
            drop(guard);
            hook();
            if let Ok(mut guard) = slot.lock() {
                guard.ready.push(hook);
            }
        }
    }

    pub fn add_write(slot: &Mutex<Self>, hook: WriteHook) {
        if let Ok(mut guard) = slot.lock() {
            guard.write.push(hook);
        }
    }

    pub fn add_drain(slot: &Mutex<Self>, hook: Hook) {
        if let Ok(mut guard) = slot.lock() {
            guard.drain.push(hook);
        }
    }

    pub fn add_dropped(slot: &Mutex<Self>, hook: DropHook) {
        if let Ok(mut guard) = slot.lock() {
            guard.dropped.push(hook);
        }
    }

    pub fn add_error(slot: &Mutex<Self>, mut hook: ErrorHook) {
        if let Ok(mut guard) = slot.lock() {
            match guard.parked_error.take() {
                Some(err) => {
                    drop(guard);
                    hook(&err);
                    if let Ok(mut guard) = slot.lock() {
                        guard.error.push(hook);
                    }
                }
                None => guard.error.push(hook),
            }
        }
    }

    pub fn add_finish(slot: &Mutex<Self>, hook: Hook) {
        if let Ok(mut guard) = slot.lock() {
            guard.finish.push(hook);
        }
    }

    pub fn add_closed(slot: &Mutex<Self>, hook: Hook) {
        if let Ok(mut guard) = slot.lock() {
            guard.closed.push(hook);
        }
    }
}
