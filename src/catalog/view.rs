//! View and sheet proxies

use super::window::Window;
use super::{as_bool, as_i64, as_optional_string, handle_op, optional_op, value_op};
use crate::bridge::{Bridge, BridgeResult, Operation, RemoteObject, Step};

/// A text buffer's presentation in a window
#[derive(Clone)]
pub struct View {
    bridge: Bridge,
    object: RemoteObject,
}

impl View {
    /// Wrap a proxy known to address a view
    pub fn new(bridge: Bridge, object: RemoteObject) -> Self {
        Self { bridge, object }
    }

    /// Underlying proxy
    pub fn object(&self) -> &RemoteObject {
        &self.object
    }

    /// Materialize the view; free when already resolved
    pub async fn materialize(&self, step: &Step) -> BridgeResult<View> {
        let object = self.object.materialize(&self.bridge, step).await?;
        Ok(View::new(self.bridge.clone(), object))
    }

    /// Host-assigned id, unique among live objects of its kind
    pub async fn id(&self, step: Option<&Step>) -> BridgeResult<i64> {
        let op = Operation::method::<&str>("id", &[]);
        as_i64(value_op(&self.bridge, &self.object, op, step).await?)
    }

    /// Path of the file shown, `None` for unsaved buffers
    pub async fn file_name(&self, step: Option<&Step>) -> BridgeResult<Option<String>> {
        let op = Operation::method::<&str>("file_name", &[]);
        as_optional_string(value_op(&self.bridge, &self.object, op, step).await?)
    }

    /// Number of characters in the buffer
    pub async fn size(&self, step: Option<&Step>) -> BridgeResult<i64> {
        let op = Operation::method::<&str>("size", &[]);
        as_i64(value_op(&self.bridge, &self.object, op, step).await?)
    }

    /// Whether the host is still reading the file from disk
    pub async fn is_loading(&self, step: Option<&Step>) -> BridgeResult<bool> {
        let op = Operation::method::<&str>("is_loading", &[]);
        as_bool(value_op(&self.bridge, &self.object, op, step).await?)
    }

    /// Window holding the view
    pub async fn window(&self, step: Option<&Step>) -> BridgeResult<Window> {
        let op = Operation::method::<&str>("window", &[]);
        let object = handle_op(&self.bridge, &self.object, op, step).await?;
        Ok(Window::new(self.bridge.clone(), object))
    }
}

/// A tab in a window: text, image, or HTML
#[derive(Clone)]
pub struct Sheet {
    bridge: Bridge,
    object: RemoteObject,
}

impl Sheet {
    /// Wrap a proxy known to address a sheet
    pub fn new(bridge: Bridge, object: RemoteObject) -> Self {
        Self { bridge, object }
    }

    /// Underlying proxy
    pub fn object(&self) -> &RemoteObject {
        &self.object
    }

    /// Materialize the sheet; free when already resolved
    pub async fn materialize(&self, step: &Step) -> BridgeResult<Sheet> {
        let object = self.object.materialize(&self.bridge, step).await?;
        Ok(Sheet::new(self.bridge.clone(), object))
    }

    /// Host-assigned id, unique among live objects of its kind
    pub async fn id(&self, step: Option<&Step>) -> BridgeResult<i64> {
        let op = Operation::method::<&str>("id", &[]);
        as_i64(value_op(&self.bridge, &self.object, op, step).await?)
    }

    /// View of a text sheet; `None` for other sheet kinds
    pub async fn view(&self, step: Option<&Step>) -> BridgeResult<Option<View>> {
        let op = Operation::method::<&str>("view", &[]);
        let object = optional_op(&self.bridge, &self.object, op, step).await?;
        Ok(object.map(|object| View::new(self.bridge.clone(), object)))
    }
}
