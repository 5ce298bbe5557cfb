use crate::{
    backend::{Backend, Lifecycle},
    state::InputRouting,
};

impl<B: Backend> InputRouting<B> {
    /// Subscribes to the collaborators' lifecycle signal, then registers the
    /// surfaces and seats that already exist.
    ///
    /// Surfaces are registered before any seat so no grab can run ahead of
    /// the surface registry.
    pub fn wire(&mut self) {
        if self.wiring.is_some() {
            tracing::warn!("Lifecycle signals already wired");
            return;
        }

        let pending = self.pending.clone();
        let token = self
            .backend
            .lifecycle()
            .subscribe(move |event| pending.borrow_mut().push_back(event.clone()));
        self.wiring = Some(token);
        tracing::debug!(?token, "Lifecycle signals wired");

        for layout in self.backend.layout_surfaces() {
            self.on_surface_created(layout);
        }
        for seat in self.backend.seat_names() {
            self.on_seat_created(&seat);
        }
        self.dispatch_lifecycle();
    }

    /// Drops the lifecycle subscription. Pending notifications are discarded.
    pub fn unwire(&mut self) {
        if let Some(token) = self.wiring.take() {
            self.backend.lifecycle().unsubscribe(token);
            self.pending.borrow_mut().clear();
            tracing::debug!(?token, "Lifecycle signals unwired");
        }
    }

    pub fn is_wired(&self) -> bool {
        self.wiring.is_some()
    }

    /// Applies every lifecycle notification received since the last call, in
    /// emission order.
    ///
    /// Input and management entry points call this first, so they never see
    /// a surface or seat the collaborators announced but the registries lack.
    pub fn dispatch_lifecycle(&mut self) {
        loop {
            let Some(event) = self.pending.borrow_mut().pop_front() else {
                break;
            };
            tracing::trace!(?event, "Lifecycle");
            match event {
                Lifecycle::SurfaceCreated(layout) => self.on_surface_created(layout),
                Lifecycle::SurfaceDestroyed(layout) => self.on_surface_destroyed(&layout),
                Lifecycle::SeatCreated(name) => self.on_seat_created(&name),
                Lifecycle::SeatCapabilitiesChanged(name) => self.handle_seat_updated_caps(&name),
                Lifecycle::SeatDestroyed(name) => self.on_seat_destroyed(&name),
            }
        }
    }
}
