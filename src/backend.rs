use std::fmt;

use smithay::{
    backend::input::{Axis, ButtonState, KeyState},
    utils::{Logical, Point, Serial},
};

use crate::{handlers::seat::Grab, signal::Signal, state::DeviceClass};

/// The compositor and surface-layout collaborators, as seen by the router.
///
/// Seats are addressed by their stable name. A `Surface` stands for a native
/// compositor surface and the view presenting it; pointer and touch focus
/// are reported in terms of it.
pub trait Backend {
    /// Handle of a surface owned by the layout collaborator.
    type LayoutSurface: Clone + fmt::Debug + 'static;
    /// Native compositor surface (and its view).
    type Surface: Clone + PartialEq + fmt::Debug;
    /// Keyboard, pointer or touch device object of a seat.
    type Device: Clone + PartialEq + fmt::Debug;
    /// Per-client device resource (`wl_keyboard`, `wl_pointer`, `wl_touch`).
    type Resource: Clone + PartialEq + fmt::Debug;

    // lifecycle

    /// Surface and seat lifecycle notifications from both collaborators.
    fn lifecycle(&mut self) -> &mut Signal<Lifecycle<Self::LayoutSurface>>;
    /// Seats that exist already, in creation order.
    fn seat_names(&self) -> Vec<String>;
    /// Layout surfaces that exist already, in creation order.
    fn layout_surfaces(&self) -> Vec<Self::LayoutSurface>;

    // layout collaborator

    /// Stable numeric id used on the wire.
    fn surface_id(&self, surface: &Self::LayoutSurface) -> u32;
    fn compositor_surface(&self, surface: &Self::LayoutSurface) -> Option<Self::Surface>;

    // seats

    fn device(&self, seat: &str, class: DeviceClass) -> Option<Self::Device>;
    /// Routes the grabbed device's raw events into the router.
    fn set_grab(&mut self, seat: &str, grab: &Grab<Self::Device>);
    fn unset_grab(&mut self, seat: &str, grab: &Grab<Self::Device>);

    // pointer

    fn pointer_location(&self, seat: &str) -> Point<f64, Logical>;
    fn move_pointer(&mut self, seat: &str, location: Point<f64, Logical>);
    fn pointer_focus(&self, seat: &str) -> Option<Self::Surface>;
    fn set_pointer_focus(&mut self, seat: &str, focus: Option<(&Self::Surface, Point<f64, Logical>)>);
    fn pointer_button_count(&self, seat: &str) -> u32;
    /// Topmost surface under a global location, with the surface-local point.
    fn surface_under(&self, location: Point<f64, Logical>) -> Option<(Self::Surface, Point<f64, Logical>)>;

    // keyboard

    fn keyboard_enter(&mut self, seat: &str, surface: &Self::Surface);
    fn keyboard_leave(&mut self, seat: &str, surface: &Self::Surface);

    // touch

    fn touch_focus(&self, seat: &str) -> Option<Self::Surface>;
    /// Active touch points, already accounting for the event being routed.
    fn touch_points(&self, seat: &str) -> u32;

    // geometry

    fn to_surface_local(&self, surface: &Self::Surface, location: Point<f64, Logical>) -> Point<f64, Logical>;
    fn input_region_contains(&self, surface: &Self::Surface, local: Point<f64, Logical>) -> bool;

    // delivery

    /// Device resources of `seat` owned by the client of `surface`.
    fn resources(&self, seat: &str, class: DeviceClass, surface: &Self::Surface) -> BoundResources<Self::Resource>;
    fn send(&mut self, surface: &Self::Surface, resource: &Self::Resource, event: &DeviceEvent);
}

/// Notification emitted by the layout or compositor collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle<L> {
    SurfaceCreated(L),
    SurfaceDestroyed(L),
    SeatCreated(String),
    /// A keyboard, pointer or touch device was added to or removed from the seat.
    SeatCapabilitiesChanged(String),
    SeatDestroyed(String),
}

/// A device's resources for one client, split the way the device tracks them:
/// the ones that already saw focus and the ones bound regardless of focus.
///
/// A resource lives in exactly one of the two lists.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundResources<R> {
    pub focused: Vec<R>,
    pub unfocused: Vec<R>,
}

impl<R> Default for BoundResources<R> {
    fn default() -> Self {
        Self {
            focused: Vec::new(),
            unfocused: Vec::new(),
        }
    }
}

impl<R> BoundResources<R> {
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.focused.iter().chain(self.unfocused.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.focused.is_empty() && self.unfocused.is_empty()
    }
}

/// An event as delivered to a client resource.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceEvent {
    Key {
        serial: Serial,
        time: u32,
        key: u32,
        state: KeyState,
    },
    Modifiers {
        serial: Serial,
        depressed: u32,
        latched: u32,
        locked: u32,
        group: u32,
    },
    PointerMotion {
        time: u32,
        location: Point<f64, Logical>,
    },
    PointerButton {
        serial: Serial,
        time: u32,
        button: u32,
        state: ButtonState,
    },
    PointerAxis {
        time: u32,
        axis: Axis,
        value: f64,
    },
    PointerFrame,
    TouchDown {
        serial: Serial,
        time: u32,
        id: i32,
        location: Point<f64, Logical>,
    },
    TouchUp {
        serial: Serial,
        time: u32,
        id: i32,
    },
    TouchMotion {
        time: u32,
        id: i32,
        location: Point<f64, Logical>,
    },
    TouchFrame,
}

impl DeviceEvent {
    pub fn class(&self) -> DeviceClass {
        match self {
            DeviceEvent::Key { .. } | DeviceEvent::Modifiers { .. } => DeviceClass::KEYBOARD,
            DeviceEvent::PointerMotion { .. }
            | DeviceEvent::PointerButton { .. }
            | DeviceEvent::PointerAxis { .. }
            | DeviceEvent::PointerFrame => DeviceClass::POINTER,
            DeviceEvent::TouchDown { .. }
            | DeviceEvent::TouchUp { .. }
            | DeviceEvent::TouchMotion { .. }
            | DeviceEvent::TouchFrame => DeviceClass::TOUCH,
        }
    }
}
