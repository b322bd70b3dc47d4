//! The interpreter facade.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use tracing::{debug, warn};

use rive_ast::{Root, Trigger};
use rive_parser::{MorphemeMode, Parser, ParserConfig, Preprocessor};
use rive_session::{MemorySessionManager, SessionManager, ThawAction, UserData};

use crate::config::{Config, ErrorMessages};
use crate::handler::{ObjectHandler, Subroutine};
use crate::sorting::SortBuffer;
use crate::RiveError;

/// Value of a `!` definition that deletes the variable instead.
const UNDEF_TAG: &str = "<undef>";

/// File extensions picked up by [`Bot::load_directory`] by default.
pub const DEFAULT_FILE_EXTENSIONS: [&str; 2] = [".rive", ".rs"];

thread_local! {
    static CURRENT_USER: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Binds the per-thread current user for the duration of one `reply` call.
/// Dropping clears the slot, so error exits can't leak a stale username.
pub(crate) struct CurrentUserGuard;

impl CurrentUserGuard {
    pub(crate) fn bind(username: &str) -> Self {
        CURRENT_USER.with(|slot| *slot.borrow_mut() = Some(username.to_string()));
        Self
    }
}

impl Drop for CurrentUserGuard {
    fn drop(&mut self) {
        CURRENT_USER.with(|slot| *slot.borrow_mut() = None);
    }
}

/// A reply-script interpreter instance.
///
/// Lifecycle: construct with a [`Config`], load sources with the `load_*`
/// methods, call [`Bot::sort_replies`] once, then serve [`Bot::reply`].
/// Loading and sorting take `&mut self`; everything reply-time takes
/// `&self`, so a `Bot` can be shared across threads once sorted.
pub struct Bot {
    pub(crate) throw_exceptions: bool,
    pub(crate) utf8: bool,
    pub(crate) morpheme: MorphemeMode,
    pub(crate) depth: AtomicUsize,
    pub(crate) unicode_punctuation: Regex,
    pub(crate) error_messages: ErrorMessages,

    parser: Parser,
    pub(crate) preprocessor: Option<Arc<dyn Preprocessor>>,

    pub(crate) global: RwLock<HashMap<String, String>>,
    pub(crate) vars: RwLock<HashMap<String, String>>,
    pub(crate) sub: HashMap<String, String>,
    pub(crate) person: HashMap<String, String>,
    pub(crate) array: HashMap<String, Vec<String>>,
    pub(crate) sessions: Box<dyn SessionManager>,
    pub(crate) includes: HashMap<String, BTreeSet<String>>,
    pub(crate) inherits: HashMap<String, BTreeSet<String>>,
    pub(crate) object_languages: HashMap<String, String>,
    pub(crate) handlers: HashMap<String, Box<dyn ObjectHandler>>,
    pub(crate) subroutines: HashMap<String, Box<dyn Subroutine>>,
    pub(crate) topics: HashMap<String, Vec<Arc<Trigger>>>,
    pub(crate) sorted: SortBuffer,

    rng: Mutex<StdRng>,
}

impl Default for Bot {
    fn default() -> Self {
        Self::new(Config::basic())
    }
}

impl Bot {
    pub fn new(config: Config) -> Self {
        let depth = if config.depth == 0 {
            Config::DEFAULT_DEPTH
        } else {
            config.depth
        };

        let punctuation = config
            .unicode_punctuation
            .as_deref()
            .unwrap_or(Config::DEFAULT_UNICODE_PUNCTUATION);
        let unicode_punctuation = Regex::new(punctuation).unwrap_or_else(|err| {
            warn!(
                "Invalid unicode punctuation pattern '{}' ({}); using default",
                punctuation, err
            );
            Regex::new(Config::DEFAULT_UNICODE_PUNCTUATION).unwrap()
        });

        let parser = Parser::new(ParserConfig {
            strict: config.strict,
            utf8: config.utf8,
            force_case: config.force_case,
            concat: config.concat,
            morpheme: config.morpheme,
            preprocessor: config.preprocessor.clone(),
        });

        let sessions = config
            .session_manager
            .unwrap_or_else(|| Box::new(MemorySessionManager::new()));

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            throw_exceptions: config.throw_exceptions,
            utf8: config.utf8,
            morpheme: config.morpheme,
            depth: AtomicUsize::new(depth),
            unicode_punctuation,
            error_messages: ErrorMessages::with_overrides(&config.error_messages),
            parser,
            preprocessor: config.preprocessor,
            global: RwLock::new(HashMap::new()),
            vars: RwLock::new(HashMap::new()),
            sub: HashMap::new(),
            person: HashMap::new(),
            array: HashMap::new(),
            sessions,
            includes: HashMap::new(),
            inherits: HashMap::new(),
            object_languages: HashMap::new(),
            handlers: HashMap::new(),
            subroutines: HashMap::new(),
            topics: HashMap::new(),
            sorted: SortBuffer::default(),
            rng: Mutex::new(rng),
        }
    }

    /// The configured recursion ceiling.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Whether UTF-8 mode is enabled.
    pub fn utf8(&self) -> bool {
        self.utf8
    }

    /*---------------------*/
    /*-- Loading Methods --*/
    /*---------------------*/

    /// Parse script lines into the bot's memory under an arbitrary label.
    pub fn load_lines<S: AsRef<str>>(&mut self, label: &str, lines: &[S]) -> Result<(), RiveError> {
        let ast = self.parser.parse(label, lines)?;
        self.merge_ast(ast);
        Ok(())
    }

    /// Parse a whole source text, split on line breaks.
    pub fn stream(&mut self, code: &str) -> Result<(), RiveError> {
        let lines: Vec<&str> = code.split('\n').collect();
        self.load_lines("stream()", &lines)
    }

    /// Load a single script document from disk.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), RiveError> {
        let path = path.as_ref();
        debug!("Loading script file: {}", path.display());
        let text = fs::read_to_string(path)?;
        let lines: Vec<&str> = text.split('\n').collect();
        self.load_lines(&path.display().to_string(), &lines)
    }

    /// Load every script document in a directory.
    ///
    /// `extensions` filters file names; empty means the default set
    /// (`.rive`, `.rs`). Files load in name order so repeated runs see the
    /// same definitions win.
    pub fn load_directory<P: AsRef<Path>>(
        &mut self,
        path: P,
        extensions: &[&str],
    ) -> Result<(), RiveError> {
        let path = path.as_ref();
        debug!("Loading script files from directory: {}", path.display());
        let extensions: Vec<&str> = if extensions.is_empty() {
            DEFAULT_FILE_EXTENSIONS.to_vec()
        } else {
            extensions.to_vec()
        };

        let mut files: Vec<_> = fs::read_dir(path)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| {
                let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
                extensions.iter().any(|ext| name.ends_with(ext))
            })
            .collect();
        files.sort();

        if files.is_empty() {
            warn!("No files found in directory: {}", path.display());
        }
        for file in files {
            self.load_file(&file)?;
        }
        Ok(())
    }

    /// Merge one parsed AST into the in-memory tables.
    fn merge_ast(&mut self, ast: Root) {
        {
            let mut global = self.global.write().expect("global vars lock poisoned");
            for (name, value) in ast.begin.global {
                if value == UNDEF_TAG {
                    global.remove(&name);
                } else {
                    global.insert(name, value);
                }
            }
        }
        {
            let mut vars = self.vars.write().expect("bot vars lock poisoned");
            for (name, value) in ast.begin.var {
                if value == UNDEF_TAG {
                    vars.remove(&name);
                } else {
                    vars.insert(name, value);
                }
            }
        }
        for (name, value) in ast.begin.sub {
            if value == UNDEF_TAG {
                self.sub.remove(&name);
            } else {
                self.sub.insert(name, value);
            }
        }
        for (name, value) in ast.begin.person {
            if value == UNDEF_TAG {
                self.person.remove(&name);
            } else {
                self.person.insert(name, value);
            }
        }
        for (name, fields) in ast.begin.array {
            if fields == [UNDEF_TAG] {
                self.array.remove(&name);
            } else {
                self.array.insert(name, fields);
            }
        }

        for (name, topic) in ast.topics {
            let includes = self.includes.entry(name.clone()).or_default();
            includes.extend(topic.includes.iter().cloned());
            let inherits = self.inherits.entry(name.clone()).or_default();
            inherits.extend(topic.inherits.iter().cloned());

            // Referenced topics get (possibly empty) entries of their own, so
            // the reply phase never sees a dangling name.
            for referenced in topic.includes.iter().chain(topic.inherits.iter()) {
                self.topics.entry(referenced.clone()).or_default();
                self.includes.entry(referenced.clone()).or_default();
                self.inherits.entry(referenced.clone()).or_default();
            }

            let triggers = self.topics.entry(name).or_default();
            for trigger in topic.triggers {
                triggers.push(Arc::new(trigger));
            }
        }

        for object in ast.objects {
            match self.handlers.get_mut(&object.language) {
                Some(handler) => {
                    handler.load(&object.name, &object.code);
                    self.object_languages
                        .insert(object.name, object.language);
                }
                None => warn!(
                    "Object '{}' not loaded as no handler was found for programming language '{}'",
                    object.name, object.language
                ),
            }
        }
    }

    /*---------------------------*/
    /*-- Configuration Methods --*/
    /*---------------------------*/

    /// Register a language handler for object macros.
    pub fn set_handler(&mut self, language: &str, handler: Box<dyn ObjectHandler>) {
        self.handlers.insert(language.to_string(), handler);
    }

    /// Remove a language handler, purging every macro it loaded.
    pub fn remove_handler(&mut self, language: &str) {
        self.object_languages.retain(|_, lang| lang != language);
        self.handlers.remove(language);
    }

    /// Register a native macro for the `<call>` tag.
    pub fn set_subroutine(&mut self, name: &str, subroutine: Box<dyn Subroutine>) {
        self.subroutines.insert(name.to_string(), subroutine);
    }

    pub fn remove_subroutine(&mut self, name: &str) {
        self.subroutines.remove(name);
    }

    /// Set a global variable (the `! global` / `<env>` namespace); `None`
    /// deletes it. The name `depth` adjusts the recursion ceiling instead.
    pub fn set_global(&self, name: &str, value: Option<&str>) {
        match value {
            None => {
                self.global
                    .write()
                    .expect("global vars lock poisoned")
                    .remove(name);
            }
            Some(value) if name == "depth" => match value.parse::<usize>() {
                Ok(depth) if depth >= 1 => self.depth.store(depth, Ordering::Relaxed),
                _ => warn!("Can't set global 'depth' to '{}'", value),
            },
            Some(value) => {
                self.global
                    .write()
                    .expect("global vars lock poisoned")
                    .insert(name.to_string(), value.to_string());
            }
        }
    }

    /// Read a global variable; `depth` reports the recursion ceiling.
    pub fn global(&self, name: &str) -> Option<String> {
        if name == "depth" {
            return Some(self.depth().to_string());
        }
        self.global
            .read()
            .expect("global vars lock poisoned")
            .get(name)
            .cloned()
    }

    /// Set a bot variable (the `! var` / `<bot>` namespace); `None` deletes.
    pub fn set_variable(&self, name: &str, value: Option<&str>) {
        let mut vars = self.vars.write().expect("bot vars lock poisoned");
        match value {
            Some(value) => {
                vars.insert(name.to_string(), value.to_string());
            }
            None => {
                vars.remove(name);
            }
        }
    }

    pub fn variable(&self, name: &str) -> Option<String> {
        self.vars
            .read()
            .expect("bot vars lock poisoned")
            .get(name)
            .cloned()
    }

    /// All bot variables, by value.
    pub fn variables(&self) -> HashMap<String, String> {
        self.vars.read().expect("bot vars lock poisoned").clone()
    }

    /// Set a substitution pattern; `None` deletes it.
    pub fn set_substitution(&mut self, name: &str, value: Option<&str>) {
        match value {
            Some(value) => {
                self.sub.insert(name.to_string(), value.to_string());
            }
            None => {
                self.sub.remove(name);
            }
        }
    }

    pub fn substitution(&self, name: &str) -> Option<String> {
        self.sub.get(name).cloned()
    }

    /// Set a person substitution pattern; `None` deletes it.
    pub fn set_person(&mut self, name: &str, value: Option<&str>) {
        match value {
            Some(value) => {
                self.person.insert(name.to_string(), value.to_string());
            }
            None => {
                self.person.remove(name);
            }
        }
    }

    pub fn person(&self, name: &str) -> Option<String> {
        self.person.get(name).cloned()
    }

    /*------------------*/
    /*-- User Methods --*/
    /*------------------*/

    /// Set a user variable (the `<set>` namespace); `None` deletes it.
    pub fn set_uservar(&self, username: &str, name: &str, value: Option<&str>) {
        self.sessions.set(username, name, value);
    }

    /// Set many user variables at once.
    pub fn set_uservars(&self, username: &str, vars: HashMap<String, String>) {
        self.sessions.set_vars(username, vars);
    }

    /// Read a user variable (the `<get>` namespace).
    pub fn get_uservar(&self, username: &str, name: &str) -> Option<String> {
        self.sessions.get(username, name)
    }

    /// Snapshot all data for one user.
    pub fn get_uservars(&self, username: &str) -> Option<UserData> {
        self.sessions.get_user(username)
    }

    pub fn clear_uservars(&self, username: &str) {
        self.sessions.clear(username);
    }

    pub fn clear_all_uservars(&self) {
        self.sessions.clear_all();
    }

    /// Keep a snapshot of a user's variables for a later thaw.
    pub fn freeze_uservars(&self, username: &str) {
        self.sessions.freeze(username);
    }

    pub fn thaw_uservars(&self, username: &str, action: ThawAction) {
        self.sessions.thaw(username, action);
    }

    /// The pattern text of the user's last matched trigger.
    pub fn last_match(&self, username: &str) -> Option<String> {
        self.sessions.get_last_match(username)
    }

    /// The user being served by the `reply` call running on this thread.
    ///
    /// Only meaningful inside object macros; `None` outside a reply.
    pub fn current_user(&self) -> Option<String> {
        CURRENT_USER.with(|slot| slot.borrow().clone())
    }

    /*-----------------------*/
    /*-- Developer Methods --*/
    /*-----------------------*/

    /// The sorted trigger patterns for a topic, in match order.
    pub fn sorted_patterns(&self, topic: &str) -> Vec<String> {
        self.sorted
            .topic(topic)
            .iter()
            .map(|entry| entry.trigger.clone())
            .collect()
    }

    /// The sorted `%Previous` patterns for a topic, in match order.
    pub fn sorted_that_patterns(&self, topic: &str) -> Vec<String> {
        self.sorted
            .thats(topic)
            .iter()
            .map(|entry| entry.trigger.clone())
            .collect()
    }

    /// All loaded topic names.
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.keys().cloned().collect();
        names.sort();
        names
    }

    /*------------------------*/
    /*-- Internal Utilities --*/
    /*------------------------*/

    /// Check a recursion counter against the ceiling.
    ///
    /// Returns `Ok(true)` when the limit is exceeded and exceptions are off;
    /// callers then bail out with the configured error text.
    pub(crate) fn check_deep_recursion(
        &self,
        depth: usize,
        message: &str,
    ) -> Result<bool, RiveError> {
        if depth > self.depth() {
            warn!("{}", message);
            if self.throw_exceptions {
                return Err(RiveError::DeepRecursion(
                    self.error_messages.get(crate::config::DEEP_RECURSION_KEY),
                ));
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Uniform random index below `len`.
    pub(crate) fn random_index(&self, len: usize) -> usize {
        let mut rng = self.rng.lock().expect("rng lock poisoned");
        rng.gen_range(0..len)
    }
}
