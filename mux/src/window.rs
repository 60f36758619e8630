use crate::error::{EntityKind, MuxError};
use crate::tab::Tab;
use crate::{Mux, MuxNotification};
use config::GuiPosition;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static WINDOW_ID: AtomicUsize = AtomicUsize::new(0);

pub type WindowId = usize;

fn alloc_window_id() -> WindowId {
    WINDOW_ID.fetch_add(1, Ordering::Relaxed)
}

/// An ordered collection of tabs, with one active at a time.
pub struct Window {
    id: WindowId,
    tabs: Vec<Arc<Tab>>,
    active: usize,
    last_active: Option<usize>,
    workspace: String,
    title: String,
    initial_position: Option<GuiPosition>,
}

impl Window {
    pub fn new(workspace: &str) -> Self {
        Self {
            id: alloc_window_id(),
            tabs: vec![],
            active: 0,
            last_active: None,
            workspace: workspace.to_string(),
            title: String::new(),
            initial_position: None,
        }
    }

    pub fn get_initial_position(&self) -> Option<GuiPosition> {
        self.initial_position.clone()
    }

    pub fn set_initial_position(&mut self, position: GuiPosition) {
        self.initial_position.replace(position);
    }

    pub fn get_workspace(&self) -> &str {
        &self.workspace
    }

    pub fn set_title(&mut self, title: &str) {
        if self.title == title {
            return;
        }
        self.title = title.to_string();
        if let Some(mux) = Mux::try_get() {
            mux.notify(MuxNotification::WindowTitleChanged {
                window_id: self.id,
                title: title.to_string(),
            });
        }
    }

    pub fn get_title(&self) -> &str {
        &self.title
    }

    pub fn set_workspace(&mut self, workspace: &str) {
        if self.workspace == workspace {
            return;
        }
        self.workspace = workspace.to_string();
        if let Some(mux) = Mux::try_get() {
            mux.notify(MuxNotification::WindowWorkspaceChanged(self.id));
        }
    }

    pub fn window_id(&self) -> WindowId {
        self.id
    }

    /// Duplicate tab ids within one window would corrupt `idx_by_id`
    /// lookups, so reject them rather than silently inserting (the teacher
    /// asserts here; we report an error instead since this is reachable
    /// from caller-supplied trees, not just internal bugs).
    fn check_that_tab_isnt_already_in_window(&self, tab: &Arc<Tab>) -> Result<(), MuxError> {
        let tab_id = tab.tab_id();
        for t in &self.tabs {
            if t.tab_id() == tab_id {
                return Err(MuxError::Duplicate {
                    kind: EntityKind::Tab,
                    id: tab_id,
                });
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, index: usize, tab: &Arc<Tab>) -> Result<(), MuxError> {
        self.check_that_tab_isnt_already_in_window(tab)?;
        self.tabs.insert(index, Arc::clone(tab));
        self.invalidate();
        Ok(())
    }

    pub fn push(&mut self, tab: &Arc<Tab>) -> Result<(), MuxError> {
        self.check_that_tab_isnt_already_in_window(tab)?;
        self.tabs.push(Arc::clone(tab));
        self.invalidate();
        Ok(())
    }

    pub fn invalidate(&self) {
        if let Some(mux) = Mux::try_get() {
            mux.notify(MuxNotification::WindowInvalidated(self.id));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn get_by_idx(&self, idx: usize) -> Option<&Arc<Tab>> {
        self.tabs.get(idx)
    }

    pub fn can_close_without_prompting(&self) -> bool {
        self.tabs.iter().all(|t| t.can_close_without_prompting())
    }

    pub fn idx_by_id(&self, tab_id: usize) -> Option<usize> {
        self.tabs.iter().position(|t| t.tab_id() == tab_id)
    }

    fn fixup_active_tab_after_removal(&mut self, removed_idx: usize) {
        if self.tabs.is_empty() {
            self.active = 0;
            self.last_active = None;
            return;
        }
        if self.active >= self.tabs.len() {
            self.active = self.tabs.len() - 1;
        } else if self.active > removed_idx {
            self.active -= 1;
        }
        if let Some(last) = self.last_active {
            if last == removed_idx {
                self.last_active = None;
            } else if last > removed_idx {
                self.last_active = Some(last - 1);
            }
        }
    }

    pub fn remove_by_idx(&mut self, idx: usize) -> Option<Arc<Tab>> {
        if idx >= self.tabs.len() {
            return None;
        }
        self.do_remove_idx(idx)
    }

    pub fn remove_by_id(&mut self, tab_id: usize) -> Option<Arc<Tab>> {
        let idx = self.idx_by_id(tab_id)?;
        self.do_remove_idx(idx)
    }

    fn do_remove_idx(&mut self, idx: usize) -> Option<Arc<Tab>> {
        let removed = self.tabs.remove(idx);
        let switch_to_last_active = config::configuration().switch_to_last_active_tab_when_closing_tab;

        if switch_to_last_active {
            if let Some(last) = self.last_active {
                let target = if last > idx { last - 1 } else { last };
                if target < self.tabs.len() {
                    self.active = target;
                    self.last_active = None;
                    self.invalidate();
                    return Some(removed);
                }
            }
        }

        self.fixup_active_tab_after_removal(idx);
        self.invalidate();
        Some(removed)
    }

    pub fn get_active(&self) -> Option<&Arc<Tab>> {
        self.tabs.get(self.active)
    }

    pub fn get_active_idx(&self) -> usize {
        self.active
    }

    pub fn save_last_active(&mut self) {
        self.last_active = Some(self.active);
    }

    pub fn get_last_active_idx(&self) -> Option<usize> {
        self.last_active
    }

    pub fn save_and_then_set_active(&mut self, idx: usize) {
        self.save_last_active();
        self.set_active_without_saving(idx);
    }

    pub fn set_active_without_saving(&mut self, idx: usize) {
        if idx == self.active {
            return;
        }
        if let Some(prev) = self.get_active() {
            if let Some(pane) = prev.get_active_pane() {
                pane.focus_changed(false);
            }
        }
        self.active = idx;
        self.invalidate();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Tab>> {
        self.tabs.iter()
    }

    /// Drop any pane within each tab that's no longer live, then drop any
    /// tab that ends up fully dead or wasn't in `live_tab_ids` at all.
    /// Returns true if the window is now empty.
    pub fn prune_dead_tabs(&mut self, live_tab_ids: &[usize]) -> bool {
        for tab in &self.tabs {
            tab.prune_dead_panes();
        }
        self.tabs
            .retain(|t| !t.is_dead() && live_tab_ids.contains(&t.tab_id()));
        if !self.tabs.is_empty() {
            if self.active >= self.tabs.len() {
                self.active = self.tabs.len() - 1;
            }
        }
        self.tabs.is_empty()
    }
}
