//! The pipeline: stage list, wiring, lifecycle

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};

use bgpipe_msg::Dir;
use bgpipe_pipe::{fq_event, FilterMode, Pipe, WaitGroup, EVENT_START};

use crate::config::{parse_stage_tokens, split_alias};
use crate::stage::StageBase;
use crate::{is_addr, is_file, CancelCause, CoreError, GlobalConfig, Registry, Result, StageRef};

/// Runtime state shared between the pipeline and every stage
pub(crate) struct Shared {
    pub pipe: Pipe,
    pub cancel: CancelCause,
    pub tracker: TaskTracker,

    /// The four-ledger wait-group discipline: a stream side closes exactly
    /// when its last registered writer (or reader) is gone
    pub wg_lwrite: WaitGroup,
    pub wg_lread: WaitGroup,
    pub wg_rwrite: WaitGroup,
    pub wg_rread: WaitGroup,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            pipe: Pipe::new(),
            cancel: CancelCause::new(),
            tracker: TaskTracker::new(),
            wg_lwrite: WaitGroup::new(),
            wg_lread: WaitGroup::new(),
            wg_rwrite: WaitGroup::new(),
            wg_rread: WaitGroup::new(),
        })
    }

    /// Start one stage exactly once: flip its flags and spawn its runner.
    ///
    /// Called directly for stages enabled at start, and from their wait
    /// event handlers for gated ones.
    pub(crate) fn start_stage(base: &StageRef) {
        if base.started.swap(true, Ordering::Relaxed) {
            return;
        }
        base.set_enabled(true);
        base.set_running(true);

        let mut runner = match base.runner.lock().take() {
            Some(runner) => runner,
            None => {
                base.set_running(false);
                base.wg_add(-1);
                return;
            }
        };

        let stage = base.clone();
        let span = stage.span();
        base.shared.tracker.spawn(
            async move {
                debug!("stage starting");
                let result = runner.run(stage.clone()).await;
                stage.set_running(false);
                stage.set_enabled(false);
                stage.wg_add(-1);

                match result {
                    Ok(()) => debug!("stage finished"),
                    Err(err) if err.is_stopped() => debug!("stage stopped"),
                    Err(err) => {
                        if stage.options.is_consumer {
                            stage.cancel(err);
                        } else {
                            warn!(%err, "stage failed");
                        }
                    }
                }
            }
            .instrument(span),
        );
    }
}

/// The root owner: global config, the ordered stage list, both streams.
///
/// Lifecycle is `configure` -> `attach` -> `start` -> `wait`; once `wait`
/// returns, all stages have returned and both streams are fully closed.
pub struct Pipeline {
    shared: Arc<Shared>,
    registry: Registry,

    /// Parsed global flags
    pub globals: GlobalConfig,

    /// Sparse 1-based stage list; index 0 is reserved
    stages: Vec<Option<StageRef>>,

    /// Auto-attached stdin/stdout stages, index 0
    internal: Vec<StageRef>,
}

impl Pipeline {
    pub fn new(registry: Registry) -> Self {
        Self {
            shared: Shared::new(),
            registry,
            globals: GlobalConfig::default(),
            stages: vec![None],
            internal: Vec::new(),
        }
    }

    /// The duplex pipe (for tests and embedders)
    pub fn pipe(&self) -> &Pipe {
        &self.shared.pipe
    }

    /// The root cancellation context
    pub fn cancel_cause(&self) -> &CancelCause {
        &self.shared.cancel
    }

    /// Number of defined stages
    pub fn stage_count(&self) -> usize {
        self.stages.iter().flatten().count()
    }

    /// Highest occupied stage index
    fn last_index(&self) -> usize {
        self.stages
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, s)| s.as_ref().map(|_| i))
            .unwrap_or(0)
    }

    /// Stage at the given index, if defined
    pub fn stage(&self, index: usize) -> Option<&StageRef> {
        self.stages.get(index).and_then(Option::as_ref)
    }

    /// Create (or return) the stage at `index` for `cmd`.
    ///
    /// `index` 0 appends. Reusing an occupied index with the same command
    /// returns the existing stage; a different command is a conflict.
    pub fn add_stage(&mut self, index: usize, cmd: &str) -> Result<StageRef> {
        let index = if index == 0 {
            self.stages.len().max(1)
        } else {
            index
        };

        if let Some(existing) = self.stages.get(index).and_then(Option::as_ref) {
            if existing.cmd == cmd {
                return Ok(existing.clone());
            }
            return Err(CoreError::StageConflict {
                index,
                cmd: cmd.to_string(),
                existing: existing.cmd.clone(),
            });
        }

        let base = self.new_stage(cmd)?;
        base.set_index(index);

        while self.stages.len() <= index {
            self.stages.push(None);
        }
        self.stages[index] = Some(base.clone());
        Ok(base)
    }

    fn new_stage(&self, cmd: &str) -> Result<StageRef> {
        let spec = self
            .registry
            .get(cmd)
            .ok_or_else(|| CoreError::UnknownCommand(cmd.to_string()))?;
        Ok(Arc::new(StageBase::new(
            cmd.to_string(),
            spec.options,
            (spec.ctor)(),
            self.shared.clone(),
        )))
    }

    // ------------------------------------------------------------------
    // Configure: argv -> stage list
    // ------------------------------------------------------------------

    /// Parse global flags, then walk the remaining tokens into stages
    pub fn configure(&mut self, argv: &[String]) -> Result<()> {
        let (global_tokens, stage_tokens) = GlobalConfig::split_argv(argv);
        self.globals = GlobalConfig::parse(&global_tokens)?;

        // 2-byte ASNs ban the AS4 capability
        self.shared
            .pipe
            .caps
            .write()
            .set_as4(!self.globals.short_asn);

        let mut tokens = stage_tokens;
        let mut index = 0;
        while !tokens.is_empty() {
            if tokens[0] == "--" {
                tokens.remove(0);
                continue;
            }

            // infer the command from the first token
            let first = tokens[0].clone();
            let (cmd, alias) = if is_addr(&first) {
                ("tcp".to_string(), None)
            } else if is_file(&first) {
                ("mrt".to_string(), None)
            } else {
                tokens.remove(0);
                let (cmd, alias) = split_alias(&first);
                (cmd.to_string(), alias)
            };

            index += 1;
            let base = self.add_stage(index, &cmd)?;
            base.set_alias(alias);

            // the stage's segment runs to the next explicit boundary
            let end = tokens
                .iter()
                .position(|t| t == "--")
                .unwrap_or(tokens.len());
            let segment: Vec<String> = tokens.drain(..end).collect();

            let command = self
                .registry
                .stage_command(&base.cmd)
                .ok_or_else(|| CoreError::UnknownCommand(base.cmd.clone()))?;
            let (matches, mut positionals) = parse_stage_tokens(&command, &segment)?;
            let mut cfg = crate::StageConfig::from_matches(matches);

            if base.options.args_rest {
                cfg.rest = std::mem::take(&mut positionals);
            } else {
                for name in base.options.args {
                    if positionals.is_empty() {
                        return Err(CoreError::MissingArgument(name.to_string()));
                    }
                    cfg.args.insert(name.to_string(), positionals.remove(0));
                }
            }
            base.set_cfg(cfg);

            // unused positionals begin the next stage
            for (i, extra) in positionals.into_iter().enumerate() {
                tokens.insert(i, extra);
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Attach: wire stages onto the streams
    // ------------------------------------------------------------------

    /// Resolve positions and directions, run every stage's `attach`, stamp
    /// registrations and event gates, add the automatic stages.
    pub fn attach(&mut self) -> Result<()> {
        if self.stage_count() == 0 {
            return Err(CoreError::NoStages);
        }

        if self.globals.reverse {
            self.reverse_stages();
        }

        let mut has_stdin = false;
        let mut has_stdout = false;
        let live: Vec<StageRef> = self.stages.iter().flatten().cloned().collect();
        for base in &live {
            self.attach_stage(base)?;
            has_stdin = has_stdin || base.options.is_stdin;
            has_stdout = has_stdout || base.options.is_stdout;
        }

        // automatic stdout: observe both directions
        if !self.globals.silent && !has_stdout && self.registry.contains("stdout") {
            let base = self.new_stage("stdout")?;
            base.with_cfg(|cfg| {
                cfg.left = true;
                cfg.right = true;
            });
            self.attach_stage(&base)
                .map_err(|e| CoreError::custom(format!("auto stdout: {e}")))?;
            self.internal.push(base);
        }

        // automatic stdin: full-traversal injection, gated on ESTABLISHED
        if self.globals.stdin && !has_stdin && self.registry.contains("stdin") {
            let base = self.new_stage("stdin")?;
            base.with_cfg(|cfg| {
                cfg.left = true;
                cfg.right = true;
                cfg.in_target = "first".to_string();
                cfg.wait = vec!["ESTABLISHED".to_string()];
            });
            self.attach_stage(&base)
                .map_err(|e| CoreError::custom(format!("auto stdin: {e}")))?;
            self.internal.push(base);
        }

        // event logger at the lowest priority
        if !self.globals.events.is_empty() {
            let types: Vec<String> = self.globals.events.iter().map(|e| fq_event(e)).collect();
            self.shared
                .pipe
                .events
                .on_event_pre(types, i64::MIN, |event| {
                    info!(
                        typ = %event.typ,
                        seq = event.seq,
                        error = event.error.as_deref(),
                        value = ?event.value,
                        "event"
                    );
                    true
                });
        }

        Ok(())
    }

    /// `--reverse`: flip the stage order and swap every L/R override
    fn reverse_stages(&mut self) {
        self.stages[1..].reverse();
        for (index, slot) in self.stages.iter().enumerate() {
            if let Some(base) = slot {
                base.set_index(index);
                base.with_cfg(|cfg| std::mem::swap(&mut cfg.left, &mut cfg.right));
            }
        }
    }

    fn attach_stage(&self, base: &StageRef) -> Result<()> {
        let index = base.index();
        let wrap = |err: CoreError| CoreError::Stage {
            index,
            name: base.name(),
            source: Box::new(err),
        };

        if index > 0 {
            base.set_position(index == 1, index == self.last_index());
        }

        // direction resolution: default is R, with role-driven exceptions
        let cfg = base.cfg();
        let mut left = cfg.left;
        let mut right = cfg.right;
        if left && right {
            if !base.options.bidir {
                return Err(wrap(CoreError::LeftRight));
            }
        } else if left == right {
            right = true;
            if base.is_last() && base.options.is_producer {
                right = false;
            } else if base.is_first() && !base.options.is_producer {
                right = false;
            }
            left = !right;
        }
        base.set_directions(left, right);

        {
            let mut runner = base.runner.lock();
            if let Some(stage) = runner.as_mut() {
                stage.attach(base).map_err(wrap)?;
            }
        }

        if index > 0 {
            if base.options.is_consumer && !(base.is_first() || base.is_last()) {
                return Err(wrap(CoreError::FirstOrLast));
            }

            let (frev, ffwd, filter_id) = self.resolve_in_target(&cfg.in_target, index)?;
            base.stamp_registrations(frev, ffwd, filter_id);
        }

        base.compute_wg_mask();
        base.wg_add(1);

        // start gate
        let wait: Vec<String> = cfg.wait.iter().map(|e| fq_event(e)).collect();
        if wait.is_empty() {
            base.set_enabled(true);
        } else {
            base.set_enabled(false);
            let target = base.clone();
            self.shared.pipe.events.on_event_pre(wait, 0, move |_| {
                Shared::start_stage(&target);
                false
            });
        }

        // stop gate
        let stop: Vec<String> = cfg.stop.iter().map(|e| fq_event(e)).collect();
        if !stop.is_empty() {
            let target = base.clone();
            self.shared.pipe.events.on_event_post(stop, 0, move |_| {
                debug!(stage = %target.name(), "stop event");
                target.stop();
                false
            });
        }

        debug!(
            index,
            cmd = %base.cmd,
            first = base.is_first(),
            last = base.is_last(),
            left = base.is_left(),
            right = base.is_right(),
            "attached"
        );
        Ok(())
    }

    /// Map `--in` to the (L-mode, R-mode, id) triple stamped on inputs
    fn resolve_in_target(
        &self,
        target: &str,
        index: usize,
    ) -> Result<(FilterMode, FilterMode, usize)> {
        match target {
            "next" | "" => Ok((FilterMode::Ge, FilterMode::Le, index)),
            "here" => Ok((FilterMode::Gt, FilterMode::Lt, index)),
            "first" => Ok((FilterMode::None, FilterMode::None, 0)),
            "last" => Ok((FilterMode::All, FilterMode::All, 0)),
            other => {
                let filter_id = if let Ok(n) = other.parse::<usize>() {
                    n
                } else if other.starts_with('@') {
                    let matches: Vec<usize> = self
                        .stages
                        .iter()
                        .flatten()
                        .filter(|s| s.name() == other)
                        .map(|s| s.index())
                        .collect();
                    match matches.len() {
                        0 => 0,
                        1 => matches[0],
                        _ => return Err(CoreError::AmbiguousName(other.to_string())),
                    }
                } else {
                    0
                };

                if filter_id == 0 {
                    return Err(CoreError::BadInject(other.to_string()));
                }
                Ok((FilterMode::Ge, FilterMode::Le, filter_id))
            }
        }
    }

    // ------------------------------------------------------------------
    // Start / wait
    // ------------------------------------------------------------------

    /// Launch the pipeline: pumps, watchers, the START event and every
    /// stage that is not gated on a wait event.
    pub async fn start(&self) {
        self.shared.pipe.start();
        self.arm_watchers();

        // internal stages first, so observers see everything
        for base in &self.internal {
            if base.is_enabled() {
                Shared::start_stage(base);
            }
        }

        self.shared.pipe.events.publish_type(EVENT_START).await;

        for base in self.stages.iter().flatten() {
            if base.is_enabled() {
                Shared::start_stage(base);
            }
        }
    }

    /// One watcher per ledger closes its stream side at zero; one more
    /// collapses everything on cancellation.
    fn arm_watchers(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.wg_lwrite.wait().await;
            shared.pipe.stream(Dir::L).close_input();
        });
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.wg_rwrite.wait().await;
            shared.pipe.stream(Dir::R).close_input();
        });
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.wg_lread.wait().await;
            shared.pipe.stream(Dir::L).close_output();
        });
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.wg_rread.wait().await;
            shared.pipe.stream(Dir::R).close_output();
        });

        let shared = self.shared.clone();
        let stages: Vec<StageRef> = self
            .stages
            .iter()
            .flatten()
            .chain(self.internal.iter())
            .cloned()
            .collect();
        tokio::spawn(async move {
            shared.cancel.cancelled().await;
            for stage in &stages {
                // release the ledger slot of stages that never ran
                if !stage.started.swap(true, Ordering::Relaxed) {
                    stage.wg_add(-1);
                }
                stage.set_running(false);
                stage.set_enabled(false);
            }
            for dir in [Dir::L, Dir::R] {
                shared.pipe.stream(dir).close_input();
                shared.pipe.stream(dir).close_output();
            }
        });
    }

    /// Block until every stage has returned and both streams are fully
    /// closed; the first recorded cancel cause becomes the result.
    pub async fn wait(&self) -> Result<()> {
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        self.shared.pipe.wait().await;

        match self.shared.cancel.take_cause() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    /// Usage screen body: the registered stage commands
    pub fn usage(&self) -> String {
        let mut out = String::new();
        for name in self.registry.names() {
            if let Some(spec) = self.registry.get(name) {
                out.push_str(&format!("  {:<22} {}\n", name, spec.options.descr));
            }
        }
        out
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_count())
            .field("globals", &self.globals)
            .finish()
    }
}
