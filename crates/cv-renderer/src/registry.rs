//! Registry for render handlers.
//!
//! The registry keeps handlers in priority order and drives their lifecycle
//! (initialization, resize, per-frame prepare and render, teardown).

use crate::context::RenderContext;
use crate::traits::{FrameInfo, RenderHandler};

pub struct RenderHandlerRegistry {
    handlers: Vec<Box<dyn RenderHandler>>,
    sorted: bool,
}

impl RenderHandlerRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            sorted: true,
        }
    }

    /// Registers a handler. A handler with the same name is replaced and
    /// returned.
    pub fn register(&mut self, handler: Box<dyn RenderHandler>) -> Option<Box<dyn RenderHandler>> {
        let previous = self.unregister(handler.name());
        tracing::debug!(name = handler.name(), priority = handler.priority(), "render handler registered");
        self.handlers.push(handler);
        self.sorted = false;
        previous
    }

    /// Unregisters a handler by name.
    ///
    /// Returns the removed handler, or None if not found.
    pub fn unregister(&mut self, name: &str) -> Option<Box<dyn RenderHandler>> {
        let pos = self.handlers.iter().position(|h| h.name() == name)?;
        Some(self.handlers.remove(pos))
    }

    pub fn get(&self, name: &str) -> Option<&dyn RenderHandler> {
        self.handlers
            .iter()
            .find(|h| h.name() == name)
            .map(|h| h.as_ref())
    }

    pub fn get_mut<'a>(&'a mut self, name: &str) -> Option<&'a mut (dyn RenderHandler + 'static)> {
        self.handlers
            .iter_mut()
            .find(|h| h.name() == name)
            .map(|h| h.as_mut())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.iter().any(|h| h.name() == name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Returns an iterator over all handlers in priority order.
    pub fn iter(&mut self) -> impl Iterator<Item = &dyn RenderHandler> {
        self.ensure_sorted();
        self.handlers.iter().map(|h| h.as_ref())
    }

    /// Returns true if any enabled handler would draw this frame.
    pub fn has_enabled(&self) -> bool {
        self.handlers.iter().any(|h| h.is_enabled())
    }

    fn ensure_sorted(&mut self) {
        if !self.sorted {
            self.handlers.sort_by_key(|h| h.priority());
            self.sorted = true;
        }
    }

    pub fn init_all(&mut self, ctx: &RenderContext) {
        self.ensure_sorted();
        for handler in &mut self.handlers {
            handler.on_init(ctx);
        }
    }

    pub fn resize_all(&mut self, ctx: &RenderContext, width: u32, height: u32) {
        for handler in &mut self.handlers {
            handler.on_resize(ctx, width, height);
        }
    }

    pub fn prepare_all(&mut self, ctx: &RenderContext, frame: &FrameInfo<'_>) {
        self.ensure_sorted();
        for handler in &mut self.handlers {
            if handler.is_enabled() {
                handler.prepare(ctx, frame);
            }
        }
    }

    /// Renders all enabled handlers in priority order. Call after
    /// [`RenderHandlerRegistry::prepare_all`].
    pub fn render_all(&self, pass: &mut wgpu::RenderPass<'_>, frame: &FrameInfo<'_>) {
        for handler in &self.handlers {
            if handler.is_enabled() {
                handler.render(pass, frame);
            }
        }
    }

    /// Destroys and removes every handler, returning them for detaching.
    pub fn destroy_all(&mut self) -> Vec<Box<dyn RenderHandler>> {
        let mut handlers = std::mem::take(&mut self.handlers);
        for handler in &mut handlers {
            handler.on_destroy();
        }
        handlers
    }
}

impl Default for RenderHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestHandler {
        name: String,
        priority: i32,
        enabled: bool,
    }

    impl TestHandler {
        fn boxed(name: &str, priority: i32) -> Box<dyn RenderHandler> {
            Box::new(Self {
                name: name.to_string(),
                priority,
                enabled: true,
            })
        }
    }

    impl RenderHandler for TestHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        fn set_enabled(&mut self, enabled: bool) {
            self.enabled = enabled;
        }

        fn on_init(&mut self, _ctx: &RenderContext) {}
        fn prepare(&mut self, _ctx: &RenderContext, _frame: &FrameInfo<'_>) {}
        fn render(&self, _pass: &mut wgpu::RenderPass<'_>, _frame: &FrameInfo<'_>) {}
    }

    #[test]
    fn test_registry_ordering() {
        let mut registry = RenderHandlerRegistry::new();

        registry.register(TestHandler::boxed("third", 300));
        registry.register(TestHandler::boxed("first", 100));
        registry.register(TestHandler::boxed("second", 200));

        let names: Vec<&str> = registry.iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_registry_unregister() {
        let mut registry = RenderHandlerRegistry::new();

        registry.register(TestHandler::boxed("test", 100));
        assert!(registry.contains("test"));

        let removed = registry.unregister("test");
        assert!(removed.is_some());
        assert!(!registry.contains("test"));
        assert!(registry.unregister("test").is_none());
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = RenderHandlerRegistry::new();
        registry.register(TestHandler::boxed("inset", 100));
        let previous = registry.register(TestHandler::boxed("inset", 50));
        assert_eq!(previous.map(|h| h.priority()), Some(100));
        assert_eq!(registry.len(), 1);
        if let Some(handler) = registry.get_mut("inset") {
            handler.set_enabled(false);
        }
        assert!(!registry.has_enabled());
    }
}
