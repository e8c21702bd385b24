use std::collections::HashMap;

use crate::models::RawFrame;

type Callback<T> = Box<dyn FnMut(&[u8]) -> T + Send>;

/// Routes notification payloads to the callback registered for their handle
pub struct Dispatcher<T> {
    callbacks: HashMap<u16, Callback<T>>,
}

impl<T> Dispatcher<T> {
    pub fn new() -> Self {
        Dispatcher {
            callbacks: HashMap::new(),
        }
    }

    /// Register `callback` for `handle`, replacing any earlier registration
    pub fn register<F>(&mut self, handle: u16, callback: F)
    where
        F: FnMut(&[u8]) -> T + Send + 'static,
    {
        self.callbacks.insert(handle, Box::new(callback));
    }

    /// Run the callback for the frame's handle. Frames for handles nobody
    /// registered are dropped and yield `None`.
    pub fn dispatch(&mut self, frame: &RawFrame) -> Option<T> {
        self.callbacks
            .get_mut(&frame.handle)
            .map(|callback| callback(&frame.payload))
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}
