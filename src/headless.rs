//! An in-memory compositor for driving the router without a display.
//!
//! Seats, surfaces and client resources are plain data; every delivered
//! event and every native focus change is recorded for inspection.

use smithay::utils::{Logical, Point};

use crate::{
    backend::{Backend, BoundResources, DeviceEvent, Lifecycle},
    handlers::seat::Grab,
    signal::Signal,
    state::DeviceClass,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeSurface(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub seat: String,
    pub class: DeviceClass,
    pub client: u32,
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub surface: u32,
    pub resource: Resource,
    pub event: DeviceEvent,
}

#[derive(Debug, Default)]
pub struct Seat {
    pub name: String,
    keyboard: Option<DeviceId>,
    pointer: Option<DeviceId>,
    touch: Option<DeviceId>,
    pub grabs: Vec<Grab<DeviceId>>,
    pub pointer_location: Point<f64, Logical>,
    pub pointer_focus: Option<NativeSurface>,
    pub buttons: u32,
    pub touch_focus: Option<NativeSurface>,
    pub touch_points: u32,
    /// Surfaces that received a native keyboard enter and no leave since.
    pub keyboard_focus: Vec<NativeSurface>,
}

#[derive(Debug, Clone)]
pub struct Surface {
    pub id: u32,
    pub client: u32,
    pub origin: Point<f64, Logical>,
    pub size: (f64, f64),
}

impl Surface {
    fn contains_global(&self, location: Point<f64, Logical>) -> bool {
        self.contains_local(location - self.origin)
    }

    fn contains_local(&self, local: Point<f64, Logical>) -> bool {
        local.x >= 0.0 && local.y >= 0.0 && local.x < self.size.0 && local.y < self.size.1
    }
}

#[derive(Debug, Default)]
pub struct Headless {
    next_device: u32,
    next_resource: u32,
    pub seats: Vec<Seat>,
    /// Stacking order, bottom first.
    pub surfaces: Vec<Surface>,
    resources: Vec<(Resource, bool)>,
    pub delivered: Vec<Delivery>,
    lifecycle: Signal<Lifecycle<u32>>,
}

impl Headless {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a seat with the given devices. Call `on_seat_created` afterwards.
    pub fn add_seat(&mut self, name: &str, capabilities: DeviceClass) {
        self.seats.push(Seat {
            name: name.to_owned(),
            ..Seat::default()
        });
        self.set_capabilities(name, capabilities);
    }

    /// Adds a seat and announces it on the lifecycle signal.
    pub fn create_seat(&mut self, name: &str, capabilities: DeviceClass) {
        self.add_seat(name, capabilities);
        self.lifecycle.emit(&Lifecycle::SeatCreated(name.to_owned()));
    }

    /// Changes a seat's devices and announces it.
    pub fn plug(&mut self, name: &str, capabilities: DeviceClass) {
        self.set_capabilities(name, capabilities);
        self.lifecycle
            .emit(&Lifecycle::SeatCapabilitiesChanged(name.to_owned()));
    }

    pub fn destroy_seat(&mut self, name: &str) {
        self.lifecycle.emit(&Lifecycle::SeatDestroyed(name.to_owned()));
        self.remove_seat(name);
    }

    /// Maps a surface and announces it.
    pub fn create_surface(&mut self, id: u32, client: u32, origin: (f64, f64), size: (f64, f64)) {
        self.map_surface(id, client, origin, size);
        self.lifecycle.emit(&Lifecycle::SurfaceCreated(id));
    }

    pub fn destroy_surface(&mut self, id: u32) {
        self.lifecycle.emit(&Lifecycle::SurfaceDestroyed(id));
        self.unmap_surface(id);
    }

    pub fn remove_seat(&mut self, name: &str) {
        self.seats.retain(|seat| seat.name != name);
    }

    /// Plugs or unplugs devices; newly plugged devices get fresh identities.
    pub fn set_capabilities(&mut self, name: &str, capabilities: DeviceClass) {
        let mut next = self.next_device;
        if let Some(seat) = self.seat_mut(name) {
            for (class, slot) in [
                (DeviceClass::KEYBOARD, &mut seat.keyboard),
                (DeviceClass::POINTER, &mut seat.pointer),
                (DeviceClass::TOUCH, &mut seat.touch),
            ] {
                match (capabilities.contains(class), slot.is_some()) {
                    (true, false) => {
                        *slot = Some(DeviceId(next));
                        next += 1;
                    }
                    (false, true) => *slot = None,
                    _ => {}
                }
            }
        }
        self.next_device = next;
    }

    /// Maps a surface on top of the stack.
    pub fn map_surface(&mut self, id: u32, client: u32, origin: (f64, f64), size: (f64, f64)) {
        self.surfaces.retain(|surface| surface.id != id);
        self.surfaces.push(Surface {
            id,
            client,
            origin: origin.into(),
            size,
        });
    }

    pub fn unmap_surface(&mut self, id: u32) {
        self.surfaces.retain(|surface| surface.id != id);
    }

    /// Binds a device resource for `client`; `focused` picks the list it lives in.
    pub fn bind_resource(&mut self, seat: &str, class: DeviceClass, client: u32, focused: bool) -> Resource {
        let resource = Resource {
            seat: seat.to_owned(),
            class,
            client,
            id: self.next_resource,
        };
        self.next_resource += 1;
        self.resources.push((resource.clone(), focused));
        resource
    }

    /// Binds a keyboard, pointer and touch resource for `client` on every seat.
    pub fn bind_all(&mut self, client: u32) {
        let seats: Vec<String> = self.seats.iter().map(|seat| seat.name.clone()).collect();
        for seat in seats {
            for class in DeviceClass::CLASSES {
                self.bind_resource(&seat, class, client, false);
            }
        }
    }

    pub fn seat(&self, name: &str) -> Option<&Seat> {
        self.seats.iter().find(|seat| seat.name == name)
    }

    pub fn seat_mut(&mut self, name: &str) -> Option<&mut Seat> {
        self.seats.iter_mut().find(|seat| seat.name == name)
    }

    /// Starts a touch point the way the compositor does before the grab runs.
    pub fn touch_begin(&mut self, name: &str, location: Point<f64, Logical>) {
        let under = self.surface_under(location).map(|(native, _)| native);
        if let Some(seat) = self.seat_mut(name) {
            if seat.touch_points == 0 {
                seat.touch_focus = under;
            }
            seat.touch_points += 1;
        }
    }

    pub fn touch_end(&mut self, name: &str) {
        if let Some(seat) = self.seat_mut(name) {
            seat.touch_points = seat.touch_points.saturating_sub(1);
        }
    }

    /// Deliveries to the given surface id, in order.
    pub fn delivered_to(&self, surface: u32) -> Vec<&DeviceEvent> {
        self.delivered
            .iter()
            .filter(|delivery| delivery.surface == surface)
            .map(|delivery| &delivery.event)
            .collect()
    }

    pub fn take_delivered(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.delivered)
    }

    fn surface(&self, native: &NativeSurface) -> Option<&Surface> {
        self.surfaces.iter().find(|surface| surface.id == native.0)
    }
}

impl Backend for Headless {
    type LayoutSurface = u32;
    type Surface = NativeSurface;
    type Device = DeviceId;
    type Resource = Resource;

    fn lifecycle(&mut self) -> &mut Signal<Lifecycle<u32>> {
        &mut self.lifecycle
    }

    fn seat_names(&self) -> Vec<String> {
        self.seats.iter().map(|seat| seat.name.clone()).collect()
    }

    fn layout_surfaces(&self) -> Vec<u32> {
        self.surfaces.iter().map(|surface| surface.id).collect()
    }

    fn surface_id(&self, surface: &u32) -> u32 {
        *surface
    }

    fn compositor_surface(&self, surface: &u32) -> Option<NativeSurface> {
        self.surfaces
            .iter()
            .any(|mapped| mapped.id == *surface)
            .then_some(NativeSurface(*surface))
    }

    fn device(&self, seat: &str, class: DeviceClass) -> Option<DeviceId> {
        let seat = self.seat(seat)?;
        if class == DeviceClass::KEYBOARD {
            seat.keyboard
        } else if class == DeviceClass::POINTER {
            seat.pointer
        } else if class == DeviceClass::TOUCH {
            seat.touch
        } else {
            None
        }
    }

    fn set_grab(&mut self, seat: &str, grab: &Grab<DeviceId>) {
        if let Some(seat) = self.seat_mut(seat) {
            seat.grabs.retain(|held| held.class() != grab.class());
            seat.grabs.push(grab.clone());
        }
    }

    fn unset_grab(&mut self, seat: &str, grab: &Grab<DeviceId>) {
        if let Some(seat) = self.seat_mut(seat) {
            seat.grabs.retain(|held| held != grab);
        }
    }

    fn pointer_location(&self, seat: &str) -> Point<f64, Logical> {
        self.seat(seat)
            .map(|seat| seat.pointer_location)
            .unwrap_or_default()
    }

    fn move_pointer(&mut self, seat: &str, location: Point<f64, Logical>) {
        if let Some(seat) = self.seat_mut(seat) {
            seat.pointer_location = location;
        }
    }

    fn pointer_focus(&self, seat: &str) -> Option<NativeSurface> {
        self.seat(seat)?.pointer_focus
    }

    fn set_pointer_focus(&mut self, seat: &str, focus: Option<(&NativeSurface, Point<f64, Logical>)>) {
        if let Some(seat) = self.seat_mut(seat) {
            seat.pointer_focus = focus.map(|(native, _)| *native);
        }
    }

    fn pointer_button_count(&self, seat: &str) -> u32 {
        self.seat(seat).map_or(0, |seat| seat.buttons)
    }

    fn surface_under(&self, location: Point<f64, Logical>) -> Option<(NativeSurface, Point<f64, Logical>)> {
        self.surfaces
            .iter()
            .rev()
            .find(|surface| surface.contains_global(location))
            .map(|surface| (NativeSurface(surface.id), location - surface.origin))
    }

    fn keyboard_enter(&mut self, seat: &str, surface: &NativeSurface) {
        if let Some(seat) = self.seat_mut(seat) {
            if !seat.keyboard_focus.contains(surface) {
                seat.keyboard_focus.push(*surface);
            }
        }
    }

    fn keyboard_leave(&mut self, seat: &str, surface: &NativeSurface) {
        if let Some(seat) = self.seat_mut(seat) {
            seat.keyboard_focus.retain(|focused| focused != surface);
        }
    }

    fn touch_focus(&self, seat: &str) -> Option<NativeSurface> {
        self.seat(seat)?.touch_focus
    }

    fn touch_points(&self, seat: &str) -> u32 {
        self.seat(seat).map_or(0, |seat| seat.touch_points)
    }

    fn to_surface_local(&self, surface: &NativeSurface, location: Point<f64, Logical>) -> Point<f64, Logical> {
        match self.surface(surface) {
            Some(surface) => location - surface.origin,
            None => location,
        }
    }

    fn input_region_contains(&self, surface: &NativeSurface, local: Point<f64, Logical>) -> bool {
        self.surface(surface)
            .is_some_and(|surface| surface.contains_local(local))
    }

    fn resources(&self, seat: &str, class: DeviceClass, surface: &NativeSurface) -> BoundResources<Resource> {
        let Some(client) = self.surface(surface).map(|surface| surface.client) else {
            return BoundResources::default();
        };
        let mut resources = BoundResources::default();
        for (resource, focused) in self.resources.iter() {
            if resource.seat != seat || resource.class != class || resource.client != client {
                continue;
            }
            if *focused {
                resources.focused.push(resource.clone());
            } else {
                resources.unfocused.push(resource.clone());
            }
        }
        resources
    }

    fn send(&mut self, surface: &NativeSurface, resource: &Resource, event: &DeviceEvent) {
        self.delivered.push(Delivery {
            surface: surface.0,
            resource: resource.clone(),
            event: *event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topmost_surface_wins() {
        let mut headless = Headless::new();
        headless.map_surface(1, 1, (0.0, 0.0), (100.0, 100.0));
        headless.map_surface(2, 2, (50.0, 50.0), (100.0, 100.0));

        let (native, local) = headless.surface_under((60.0, 70.0).into()).unwrap();
        assert_eq!(native, NativeSurface(2));
        assert_eq!(local, Point::from((10.0, 20.0)));

        let (native, _) = headless.surface_under((10.0, 10.0).into()).unwrap();
        assert_eq!(native, NativeSurface(1));
        assert!(headless.surface_under((500.0, 500.0).into()).is_none());
    }

    #[test]
    fn replugged_device_gets_new_identity() {
        let mut headless = Headless::new();
        headless.add_seat("default", DeviceClass::KEYBOARD);
        let first = headless.device("default", DeviceClass::KEYBOARD).unwrap();

        headless.set_capabilities("default", DeviceClass::empty());
        assert!(headless.device("default", DeviceClass::KEYBOARD).is_none());

        headless.set_capabilities("default", DeviceClass::KEYBOARD);
        let second = headless.device("default", DeviceClass::KEYBOARD).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn resources_are_split_by_list() {
        let mut headless = Headless::new();
        headless.add_seat("default", DeviceClass::KEYBOARD);
        headless.map_surface(1, 7, (0.0, 0.0), (10.0, 10.0));
        let focused = headless.bind_resource("default", DeviceClass::KEYBOARD, 7, true);
        let unfocused = headless.bind_resource("default", DeviceClass::KEYBOARD, 7, false);
        headless.bind_resource("default", DeviceClass::KEYBOARD, 8, false);

        let resources = headless.resources("default", DeviceClass::KEYBOARD, &NativeSurface(1));
        assert_eq!(resources.focused, vec![focused]);
        assert_eq!(resources.unfocused, vec![unfocused]);
    }
}
