// mapflow/src/linking.rs

//! Cross-view linking between the map image, the embedding scatter plot and
//! the spectrum plots.
//!
//! A click becomes a `ViewEvent`. `derive_notifications` turns it into the
//! notifications every view needs, always in the order spectrum, cluster mean,
//! scatter crosshair, image crosshair, and `EventBus` hands them to subscribers
//! in registration order. Views never call each other directly.

use mapcore::data::index_map::Rc;
use mapcore::{MapError, Result};

use crate::session::Session;

/// User interaction in display coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ViewEvent {
    /// `x` along columns, `y` from the top of the flipped image
    ImageClicked { x: f64, y: f64 },
    /// position in embedding space
    ScatterClicked { x: f64, y: f64 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    SpectrumShown { spectrum: usize, coord: Rc },
    ClusterMeanShown { cluster: usize, mean: Vec<f64> },
    ScatterCrosshair { x: f64, y: f64 },
    /// crosshair at the pixel centre, with the pixel's cluster if clustered
    ImageCrosshair { x: f64, y: f64, coord: Rc, cluster: Option<usize> },
}

/// Map pixel under a click on the display image.
fn pixel_at(session: &Session, x: f64, y: f64) -> Option<Rc> {
    let (rows, cols) = session.index_map().shape();
    if !(x >= 0.0 && y >= 0.0) {
        return None;
    }
    let (col, display_row) = (x.floor() as usize, y.floor() as usize);
    if col >= cols || display_row >= rows {
        return None;
    }
    Some((rows - 1 - display_row, col))
}

fn spectrum_notifications(session: &Session, spectrum: usize, coord: Rc) -> Result<Vec<Notification>> {
    let clustering = session.clustering();
    let rows = session.index_map().rows();
    let row = clustering.row_of_spectrum(spectrum);

    let mut out = vec![Notification::SpectrumShown { spectrum, coord }];
    let mut cluster = None;
    if let (Some(row), Some(_)) = (row, clustering.clusters()) {
        let (label, mean) = clustering.cluster_mean_of_row(row)?;
        cluster = Some(label);
        out.push(Notification::ClusterMeanShown { cluster: label, mean });
    }
    if let Some((x, y)) = row.and_then(|r| clustering.scatter().and_then(|_| clustering.scatter_point(r))) {
        out.push(Notification::ScatterCrosshair { x, y });
    }
    out.push(Notification::ImageCrosshair {
        x: coord.1 as f64 + 0.5,
        y: (rows - coord.0) as f64 - 0.5,
        coord,
        cluster,
    });
    Ok(out)
}

/// Notifications for `event` against the session's current state.
///
/// Clicks that land on no spectrum yield nothing, as does a scatter click
/// before the scatter plot exists.
pub fn derive_notifications(session: &Session, event: ViewEvent) -> Result<Vec<Notification>> {
    match event {
        ViewEvent::ImageClicked { x, y } => {
            let Some(coord) = pixel_at(session, x, y) else {
                return Ok(Vec::new());
            };
            match session.index_map().index_of(coord) {
                Some(spectrum) => spectrum_notifications(session, spectrum, coord),
                None => Ok(Vec::new()),
            }
        }
        ViewEvent::ScatterClicked { x, y } => {
            let clustering = session.clustering();
            let row = match clustering.nearest_row(x, y) {
                Ok(row) => row,
                Err(MapError::NotFitted) => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };
            let spectrum = clustering
                .spectrum_of_row(row)
                .ok_or(MapError::IndexOutOfRange { index: row, len: clustering.n_rows() })?;
            let coord = session
                .index_map()
                .coordinate_of(spectrum)
                .ok_or(MapError::IndexOutOfRange { index: spectrum, len: session.index_map().len() })?;
            spectrum_notifications(session, spectrum, coord)
        }
    }
}

/// Receives notifications from an `EventBus`.
pub trait ViewSubscriber {
    fn notify(&mut self, notification: &Notification);
}

impl<F: FnMut(&Notification)> ViewSubscriber for F {
    fn notify(&mut self, notification: &Notification) {
        self(notification)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(usize);

#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<(SubscriberId, Box<dyn ViewSubscriber>)>,
    next_id: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: impl ViewSubscriber + 'static) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Delivers each notification to every subscriber before moving to the next.
    pub fn publish(&mut self, notifications: &[Notification]) {
        for notification in notifications {
            for (_, subscriber) in self.subscribers.iter_mut() {
                subscriber.notify(notification);
            }
        }
    }
}

/// Event bus bound to the active session's derived state.
#[derive(Default)]
pub struct LinkedViews {
    pub bus: EventBus,
}

impl LinkedViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the notifications for `event`, publishes them and returns them.
    ///
    /// Nothing is published when derivation fails.
    pub fn dispatch(&mut self, session: &Session, event: ViewEvent) -> Result<Vec<Notification>> {
        let notifications = derive_notifications(session, event)?;
        log::debug!("{:?} -> {} notifications", event, notifications.len());
        self.bus.publish(&notifications);
        Ok(notifications)
    }
}
