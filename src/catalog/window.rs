//! Window proxy

use serde_json::{Map, Value};
use std::future::Future;

use super::view::{Sheet, View};
use super::{
    as_i64, as_optional_string, as_string_list, handle_list_op, handle_op, optional_op, value_op,
};
use crate::bridge::{
    Bridge, BridgeResult, CallbackContext, CallbackOperation, CallbackSlot, Operation,
    PayloadShape, RemoteObject, ResultShape, Step, TransportError, codegen, quote,
};

/// An editor window living in the host
#[derive(Clone)]
pub struct Window {
    bridge: Bridge,
    object: RemoteObject,
}

impl Window {
    /// Wrap a proxy known to address a window
    pub fn new(bridge: Bridge, object: RemoteObject) -> Self {
        Self { bridge, object }
    }

    /// Underlying proxy
    pub fn object(&self) -> &RemoteObject {
        &self.object
    }

    /// Materialize the window; free when already resolved
    pub async fn materialize(&self, step: &Step) -> BridgeResult<Window> {
        let object = self.object.materialize(&self.bridge, step).await?;
        Ok(Window::new(self.bridge.clone(), object))
    }

    /// Host-assigned window id
    pub async fn id(&self, step: Option<&Step>) -> BridgeResult<i64> {
        as_i64(self.value(Operation::method::<&str>("id", &[]), step).await?)
    }

    /// Open an empty buffer
    pub async fn new_file(&self, step: Option<&Step>) -> BridgeResult<View> {
        self.view(Operation::method::<&str>("new_file", &[]), step).await
    }

    /// Open `path`; `flags` are the host's open-file flags
    pub async fn open_file(
        &self,
        path: &str,
        flags: i64,
        step: Option<&Step>,
    ) -> BridgeResult<View> {
        let op = Operation::method("open_file", &[quote::string(path), quote::integer(flags)]);
        self.view(op, step).await
    }

    /// View already showing `path`, if any
    pub async fn find_open_file(
        &self,
        path: &str,
        step: Option<&Step>,
    ) -> BridgeResult<Option<View>> {
        let op = Operation::method("find_open_file", &[quote::string(path)]);
        self.optional_view(op, step).await
    }

    /// Focused sheet
    pub async fn active_sheet(&self, step: Option<&Step>) -> BridgeResult<Sheet> {
        self.sheet(Operation::method::<&str>("active_sheet", &[]), step).await
    }

    /// Focused sheet of `group`
    pub async fn active_sheet_in_group(
        &self,
        group: i64,
        step: Option<&Step>,
    ) -> BridgeResult<Sheet> {
        let op = Operation::method("active_sheet_in_group", &[quote::integer(group)]);
        self.sheet(op, step).await
    }

    /// Focused view
    pub async fn active_view(&self, step: Option<&Step>) -> BridgeResult<View> {
        self.view(Operation::method::<&str>("active_view", &[]), step).await
    }

    /// Focused view of `group`
    pub async fn active_view_in_group(
        &self,
        group: i64,
        step: Option<&Step>,
    ) -> BridgeResult<View> {
        let op = Operation::method("active_view_in_group", &[quote::integer(group)]);
        self.view(op, step).await
    }

    /// Every view of the window, in tab order
    pub async fn views(&self, step: Option<&Step>) -> BridgeResult<Vec<View>> {
        self.view_list(Operation::method::<&str>("views", &[]), step).await
    }

    /// Views of one group, in tab order
    pub async fn views_in_group(&self, group: i64, step: Option<&Step>) -> BridgeResult<Vec<View>> {
        let op = Operation::method("views_in_group", &[quote::integer(group)]);
        self.view_list(op, step).await
    }

    /// Every sheet of the window, in tab order
    pub async fn sheets(&self, step: Option<&Step>) -> BridgeResult<Vec<Sheet>> {
        self.sheet_list(Operation::method::<&str>("sheets", &[]), step).await
    }

    /// Sheets of one group, in tab order
    pub async fn sheets_in_group(
        &self,
        group: i64,
        step: Option<&Step>,
    ) -> BridgeResult<Vec<Sheet>> {
        let op = Operation::method("sheets_in_group", &[quote::integer(group)]);
        self.sheet_list(op, step).await
    }

    /// Number of view groups in the layout
    pub async fn num_groups(&self, step: Option<&Step>) -> BridgeResult<i64> {
        as_i64(self.value(Operation::method::<&str>("num_groups", &[]), step).await?)
    }

    /// Index of the focused group
    pub async fn active_group(&self, step: Option<&Step>) -> BridgeResult<i64> {
        as_i64(self.value(Operation::method::<&str>("active_group", &[]), step).await?)
    }

    /// Move focus to `group`
    pub async fn focus_group(&self, group: i64, step: Option<&Step>) -> BridgeResult<()> {
        let op = Operation::method("focus_group", &[quote::integer(group)]);
        self.value(op, step).await.map(drop)
    }

    /// Focus `sheet`; a pending sheet is materialized inside the same program
    pub async fn focus_sheet(&self, sheet: &Sheet, step: Option<&Step>) -> BridgeResult<()> {
        let target = sheet.object().source(self.bridge.config());
        self.value(Operation::method("focus_sheet", &[target]), step)
            .await
            .map(drop)
    }

    /// Focus `view`; a pending view is materialized inside the same program
    pub async fn focus_view(&self, view: &View, step: Option<&Step>) -> BridgeResult<()> {
        let target = view.object().source(self.bridge.config());
        self.value(Operation::method("focus_view", &[target]), step)
            .await
            .map(drop)
    }

    /// Show `message` in the status bar
    pub async fn status_message(&self, message: &str, step: Option<&Step>) -> BridgeResult<()> {
        let op = Operation::method("status_message", &[quote::string(message)]);
        self.value(op, step).await.map(drop)
    }

    /// Run a host command by name, with optional arguments
    pub async fn run_command(
        &self,
        command: &str,
        args: Option<&Map<String, Value>>,
        step: Option<&Step>,
    ) -> BridgeResult<()> {
        let mut quoted = vec![quote::string(command)];
        if let Some(args) = args {
            quoted.push(quote::mapping(args));
        }
        self.value(Operation::method("run_command", quoted.as_slice()), step)
            .await
            .map(drop)
    }

    /// Project data as stored by the host, null without a project
    pub async fn project_data(&self, step: Option<&Step>) -> BridgeResult<Value> {
        self.value(Operation::method::<&str>("project_data", &[]), step).await
    }

    /// Replace the project data
    pub async fn set_project_data(&self, data: &Value, step: Option<&Step>) -> BridgeResult<()> {
        let op = Operation::method("set_project_data", &[quote::json(data)]);
        self.value(op, step).await.map(drop)
    }

    /// Folders open in the sidebar
    pub async fn folders(&self, step: Option<&Step>) -> BridgeResult<Vec<String>> {
        as_string_list(self.value(Operation::method::<&str>("folders", &[]), step).await?)
    }

    /// Build-system variables (`file`, `project_path` and the like) for the window
    pub async fn extract_variables(&self, step: Option<&Step>) -> BridgeResult<Map<String, Value>> {
        match self.value(Operation::method::<&str>("extract_variables", &[]), step).await? {
            Value::Object(variables) => Ok(variables),
            Value::Null => Ok(Map::new()),
            other => Err(TransportError::MalformedEnvelope(format!(
                "expected a mapping, got {other}"
            ))
            .into()),
        }
    }

    /// Create (or reuse) the output panel `name`
    pub async fn create_output_panel(
        &self,
        name: &str,
        unlisted: bool,
        step: Option<&Step>,
    ) -> BridgeResult<View> {
        let op = Operation::method(
            "create_output_panel",
            &[quote::string(name), quote::boolean(unlisted).to_string()],
        );
        self.view(op, step).await
    }

    /// Output panel `name`, if it exists
    pub async fn find_output_panel(
        &self,
        name: &str,
        step: Option<&Step>,
    ) -> BridgeResult<Option<View>> {
        let op = Operation::method("find_output_panel", &[quote::string(name)]);
        self.optional_view(op, step).await
    }

    /// Remove the output panel `name`
    pub async fn destroy_output_panel(&self, name: &str, step: Option<&Step>) -> BridgeResult<()> {
        let op = Operation::method("destroy_output_panel", &[quote::string(name)]);
        self.value(op, step).await.map(drop)
    }

    /// Name of the visible panel, `None` when every panel is hidden
    pub async fn active_panel(&self, step: Option<&Step>) -> BridgeResult<Option<String>> {
        as_optional_string(self.value(Operation::method::<&str>("active_panel", &[]), step).await?)
    }

    /// Names of every panel the window can show
    pub async fn panels(&self, step: Option<&Step>) -> BridgeResult<Vec<String>> {
        as_string_list(self.value(Operation::method::<&str>("panels", &[]), step).await?)
    }

    /// Show a quick panel. Returns once the panel is up; selection arrives
    /// through the panel's callbacks.
    pub async fn show_quick_panel(
        &self,
        panel: QuickPanel,
        step: &Step,
    ) -> BridgeResult<CallbackOperation> {
        let config = self.bridge.config();
        let mut slots = vec![panel.on_select];
        let on_highlight = match panel.on_highlight {
            Some(slot) => {
                slots.push(slot);
                codegen::callback_lambda(config, &["index"])
            }
            None => quote::null().to_string(),
        };

        let template = format!(
            "{}.show_quick_panel({}, {}, {}, {}, {})",
            self.object.source(config),
            quote::string_list(&panel.items),
            codegen::callback_lambda(config, &["index"]),
            quote::integer(panel.flags),
            quote::integer(panel.selected_index),
            on_highlight,
        );
        self.bridge
            .invoke(&template, ResultShape::Value, slots, step)
            .await
    }

    /// Show an input panel. The operation's outcome is the panel's view.
    pub async fn show_input_panel(
        &self,
        panel: InputPanel,
        step: &Step,
    ) -> BridgeResult<CallbackOperation> {
        let config = self.bridge.config();
        let mut slots = vec![panel.on_done];
        let mut optional = |slot: Option<CallbackSlot>, params: &[&str]| match slot {
            Some(slot) => {
                slots.push(slot);
                codegen::callback_lambda(config, params)
            }
            None => quote::null().to_string(),
        };
        let on_change = optional(panel.on_change, &["text"]);
        let on_cancel = optional(panel.on_cancel, &[]);

        let template = format!(
            "{}.show_input_panel({}, {}, {}, {}, {})",
            self.object.source(config),
            quote::string(&panel.caption),
            quote::string(&panel.initial_text),
            codegen::callback_lambda(config, &["text"]),
            on_change,
            on_cancel,
        );
        self.bridge
            .invoke(&template, ResultShape::Handle, slots, step)
            .await
    }

    async fn value(&self, op: Operation, step: Option<&Step>) -> BridgeResult<Value> {
        value_op(&self.bridge, &self.object, op, step).await
    }

    async fn view(&self, op: Operation, step: Option<&Step>) -> BridgeResult<View> {
        let object = handle_op(&self.bridge, &self.object, op, step).await?;
        Ok(View::new(self.bridge.clone(), object))
    }

    async fn sheet(&self, op: Operation, step: Option<&Step>) -> BridgeResult<Sheet> {
        let object = handle_op(&self.bridge, &self.object, op, step).await?;
        Ok(Sheet::new(self.bridge.clone(), object))
    }

    async fn optional_view(
        &self,
        op: Operation,
        step: Option<&Step>,
    ) -> BridgeResult<Option<View>> {
        let object = optional_op(&self.bridge, &self.object, op, step).await?;
        Ok(object.map(|object| View::new(self.bridge.clone(), object)))
    }

    async fn view_list(&self, op: Operation, step: Option<&Step>) -> BridgeResult<Vec<View>> {
        let objects = handle_list_op(&self.bridge, &self.object, op, step).await?;
        Ok(objects
            .into_iter()
            .map(|object| View::new(self.bridge.clone(), object))
            .collect())
    }

    async fn sheet_list(&self, op: Operation, step: Option<&Step>) -> BridgeResult<Vec<Sheet>> {
        let objects = handle_list_op(&self.bridge, &self.object, op, step).await?;
        Ok(objects
            .into_iter()
            .map(|object| Sheet::new(self.bridge.clone(), object))
            .collect())
    }
}

/// Quick panel request: items plus a one-shot selection callback
///
/// The selection payload is the chosen index, `-1` when dismissed.
pub struct QuickPanel {
    items: Vec<String>,
    flags: i64,
    selected_index: i64,
    on_select: CallbackSlot,
    on_highlight: Option<CallbackSlot>,
}

impl QuickPanel {
    /// Panel listing `items`; `on_select` fires once
    pub fn new<I, S, F, Fut>(items: I, on_select: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BridgeResult<()>> + Send + 'static,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
            flags: 0,
            selected_index: -1,
            on_select: CallbackSlot::one_shot(PayloadShape::Value, on_select),
            on_highlight: None,
        }
    }

    /// Host quick-panel flags
    pub fn flags(mut self, flags: i64) -> Self {
        self.flags = flags;
        self
    }

    /// Item highlighted when the panel opens
    pub fn selected_index(mut self, index: i64) -> Self {
        self.selected_index = index;
        self
    }

    /// Called with the index of each highlighted item until selection
    pub fn on_highlight<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BridgeResult<()>> + Send + 'static,
    {
        self.on_highlight = Some(CallbackSlot::repeatable(PayloadShape::Value, callback));
        self
    }
}

/// Input panel request: caption, initial text, and a one-shot done callback
pub struct InputPanel {
    caption: String,
    initial_text: String,
    on_done: CallbackSlot,
    on_change: Option<CallbackSlot>,
    on_cancel: Option<CallbackSlot>,
}

impl InputPanel {
    /// Panel prompting with `caption`; `on_done` receives the entered text
    pub fn new<F, Fut>(
        caption: impl Into<String>,
        initial_text: impl Into<String>,
        on_done: F,
    ) -> Self
    where
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BridgeResult<()>> + Send + 'static,
    {
        Self {
            caption: caption.into(),
            initial_text: initial_text.into(),
            on_done: CallbackSlot::one_shot(PayloadShape::Value, on_done),
            on_change: None,
            on_cancel: None,
        }
    }

    /// Called with the text after every edit
    pub fn on_change<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BridgeResult<()>> + Send + 'static,
    {
        self.on_change = Some(CallbackSlot::repeatable(PayloadShape::Value, callback));
        self
    }

    /// Called without a payload when the panel is dismissed
    pub fn on_cancel<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BridgeResult<()>> + Send + 'static,
    {
        self.on_cancel = Some(CallbackSlot::one_shot(PayloadShape::Empty, callback));
        self
    }
}
