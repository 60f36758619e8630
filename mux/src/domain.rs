use crate::pane::PaneId;
use crate::tab::{SplitRequest, SplitSize, Tab};
use crate::Mux;
use anyhow::{bail, Context};
use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static DOMAIN_ID: AtomicUsize = AtomicUsize::new(0);

pub type DomainId = usize;

pub fn alloc_domain_id() -> DomainId {
    DOMAIN_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    Detached,
    Attached,
}

/// A `Domain` is a source of panes. The only implementation in this core is
/// `LocalDomain`, which spawns PTY-backed local processes, but the trait
/// boundary is kept so that a remote/multiplexed domain can be added later
/// without touching `Mux` or `Tab`.
#[async_trait(?Send)]
pub trait Domain: Downcast {
    /// Spawn a brand new tab containing a single pane running `command` (or
    /// the domain's default program), and register it with `mux`.
    async fn spawn(
        &self,
        size: PtySize,
        command: Option<CommandBuilder>,
        command_dir: Option<PathBuf>,
        window: crate::window::WindowId,
    ) -> anyhow::Result<Arc<Tab>> {
        let pane = self
            .spawn_pane(size, command, command_dir)
            .await
            .context("domain::spawn spawn_pane")?;

        let tab = Arc::new(Tab::new(&size));
        tab.assign_pane(&pane);

        let mux = Mux::get();
        mux.add_tab_and_active_pane(&tab)?;
        mux.add_tab_to_window(&tab, window)?;

        Ok(tab)
    }

    /// Split an existing pane and spawn a new one into the resulting space.
    async fn split_pane(
        &self,
        command: Option<CommandBuilder>,
        command_dir: Option<PathBuf>,
        tab: &Arc<Tab>,
        pane_id: PaneId,
        request: SplitRequest,
    ) -> anyhow::Result<Arc<dyn crate::pane::Pane>> {
        let (pane_size, split_size) = tab
            .compute_split_size(pane_id, request)
            .ok_or_else(|| anyhow::anyhow!("pane {} not found in tab", pane_id))?;

        let size = portable_pty::PtySize {
            rows: pane_size.rows as u16,
            cols: pane_size.cols as u16,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pane = self
            .spawn_pane(size, command, command_dir)
            .await
            .context("domain::split_pane spawn_pane")?;

        tab.split_and_insert(pane_id, request, Arc::clone(&pane))
            .context("split_and_insert")?;
        let _ = split_size;

        Ok(pane)
    }

    /// Spawn a single new pane; the caller is responsible for wiring it into
    /// a tab (via `spawn` or `split_pane`).
    async fn spawn_pane(
        &self,
        size: PtySize,
        command: Option<CommandBuilder>,
        command_dir: Option<PathBuf>,
    ) -> anyhow::Result<Arc<dyn crate::pane::Pane>>;

    /// Can this domain currently spawn new panes?
    fn spawnable(&self) -> bool {
        true
    }

    fn domain_id(&self) -> DomainId;

    fn domain_name(&self) -> &str;

    fn domain_label(&self) -> String {
        self.domain_name().to_string()
    }

    async fn attach(&self) -> anyhow::Result<()>;

    fn detach(&self) -> anyhow::Result<()> {
        bail!("detach not implemented for domain {}", self.domain_name())
    }

    fn state(&self) -> DomainState;

    /// Called when the last local window referencing this domain is about
    /// to close; gives the domain a chance to veto or clean up.
    fn local_window_is_closing(&self, _window: crate::window::WindowId) {}
}
impl_downcast!(Domain);

/// Spawns panes as local PTY-backed child processes.
pub struct LocalDomain {
    pty_system: Box<dyn portable_pty::PtySystem + Send>,
    id: DomainId,
    name: String,
}

impl LocalDomain {
    pub fn new(name: &str) -> anyhow::Result<Self> {
        Ok(Self::with_pty_system(name, native_pty_system()))
    }

    pub fn with_pty_system(name: &str, pty_system: Box<dyn portable_pty::PtySystem + Send>) -> Self {
        Self {
            pty_system,
            id: alloc_domain_id(),
            name: name.to_string(),
        }
    }

    fn fixup_command(&self, cmd: &mut CommandBuilder) {
        // Not normally a fan of existence-checking, but skipping it here can
        // be painful: a cwd inherited from a remote system via OSC 7 may not
        // exist locally, and that breaks process spawning.
        if let Some(dir) = cmd.get_cwd() {
            if !PathBuf::from(dir).exists() {
                cmd.clear_cwd();
            }
        }
    }

    fn build_command(
        &self,
        command: Option<CommandBuilder>,
        command_dir: Option<PathBuf>,
    ) -> anyhow::Result<CommandBuilder> {
        let config = config::configuration();
        let mut cmd = match command {
            Some(c) => c,
            None => config.build_prog(None, command_dir.as_ref())?,
        };
        config.apply_cmd_defaults(&mut cmd, command_dir.as_ref());
        self.fixup_command(&mut cmd);
        Ok(cmd)
    }
}

#[async_trait(?Send)]
impl Domain for LocalDomain {
    async fn spawn_pane(
        &self,
        size: PtySize,
        command: Option<CommandBuilder>,
        command_dir: Option<PathBuf>,
    ) -> anyhow::Result<Arc<dyn crate::pane::Pane>> {
        let cmd = self.build_command(command, command_dir)?;

        let pair = self
            .pty_system
            .openpty(size)
            .context("opening local pty")?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .context("spawning command into pty")?;
        drop(pair.slave);

        let pane_id = crate::pane::alloc_pane_id();
        let writer = pair.master.take_writer().context("take_writer")?;

        let pane: Arc<dyn crate::pane::Pane> = Arc::new(crate::localpane::LocalPane::new(
            pane_id,
            child,
            pair.master,
            writer,
            self.id,
            size,
        ));

        Ok(pane)
    }

    fn domain_id(&self) -> DomainId {
        self.id
    }

    fn domain_name(&self) -> &str {
        &self.name
    }

    async fn attach(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn detach(&self) -> anyhow::Result<()> {
        bail!("detach not implemented for LocalDomain")
    }

    fn state(&self) -> DomainState {
        DomainState::Attached
    }
}
