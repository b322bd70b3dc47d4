//! Trigger collection and the multi-level match ordering.
//!
//! After every source is loaded, [`Bot::sort_replies`] lays all triggers into
//! one priority-ordered buffer per topic. Matching later walks each buffer
//! front to back and stops at the first hit, so the entire priority scheme
//! lives here: weight, inheritance level, specificity class, word count,
//! length.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use rive_ast::Trigger;

use crate::regexp::{RE_INHERITS, RE_WEIGHT};
use crate::strings::count_words;
use crate::{Bot, RiveError};

/// One slot in a sorted buffer: the sortable pattern text plus a pointer to
/// the parsed trigger it came from.
///
/// The text may carry (and later lose) an `{inherits=N}` prefix; the pointer
/// is never touched.
#[derive(Debug, Clone)]
pub(crate) struct SortedTriggerEntry {
    pub(crate) trigger: String,
    pub(crate) pointer: Arc<Trigger>,
}

impl SortedTriggerEntry {
    fn new(trigger: &str, pointer: Arc<Trigger>) -> Self {
        Self {
            trigger: trigger.to_string(),
            pointer,
        }
    }
}

/// Output of [`Bot::sort_replies`]: per-topic match orders plus the sorted
/// substitution key lists.
#[derive(Debug, Clone, Default)]
pub struct SortBuffer {
    pub(crate) topics: BTreeMap<String, Vec<SortedTriggerEntry>>,
    pub(crate) thats: BTreeMap<String, Vec<SortedTriggerEntry>>,
    pub(crate) sub: Vec<String>,
    pub(crate) person: Vec<String>,
}

impl SortBuffer {
    pub(crate) fn topic(&self, name: &str) -> &[SortedTriggerEntry] {
        self.topics.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub(crate) fn thats(&self, name: &str) -> &[SortedTriggerEntry] {
        self.thats.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

/// Per-inheritance-level classification of triggers by specificity.
///
/// `atomic` through `wild` order by word count within the class; `under`,
/// `pound` and `star` hold pure-wildcard patterns ordered by length alone.
#[derive(Debug, Default)]
struct SortTrack {
    atomic: BTreeMap<usize, Vec<SortedTriggerEntry>>,
    option: BTreeMap<usize, Vec<SortedTriggerEntry>>,
    alpha: BTreeMap<usize, Vec<SortedTriggerEntry>>,
    number: BTreeMap<usize, Vec<SortedTriggerEntry>>,
    wild: BTreeMap<usize, Vec<SortedTriggerEntry>>,
    under: Vec<SortedTriggerEntry>,
    pound: Vec<SortedTriggerEntry>,
    star: Vec<SortedTriggerEntry>,
}

impl Bot {
    /// Sort loaded triggers into the match buffer.
    ///
    /// Must run after the last `load_*` call and before the first
    /// [`Bot::reply`]. Sorting again is a no-op on the buffer contents.
    pub fn sort_replies(&mut self) -> Result<(), RiveError> {
        let mut sorted = SortBuffer::default();
        debug!("Sorting triggers...");

        let names: Vec<String> = self.topics.keys().cloned().collect();
        for topic in names {
            debug!("Analyzing topic {}", topic);

            let all_triggers = self.get_topic_triggers(&topic, false, 0, 0, false)?;
            sorted
                .topics
                .insert(topic.clone(), sort_trigger_set(all_triggers, true));

            let that_triggers = self.get_topic_triggers(&topic, true, 0, 0, false)?;
            sorted
                .thats
                .insert(topic.clone(), sort_trigger_set(that_triggers, false));
        }

        sorted.sub = sort_list(self.sub.keys());
        sorted.person = sort_list(self.person.keys());

        self.sorted = sorted;
        Ok(())
    }

    /// Recursively collect the triggers reachable from `topic`.
    ///
    /// `includes` edges pool triggers at equal priority; `inherits` edges
    /// layer them below the inheriting topic, which is expressed by
    /// prefixing the pattern text with `{inherits=N}` labels consumed during
    /// sorting. With `thats` set, only triggers carrying a `%Previous` are
    /// collected, keyed by the previous pattern instead of the trigger text.
    fn get_topic_triggers(
        &self,
        topic: &str,
        thats: bool,
        depth: usize,
        inheritance: usize,
        inherited: bool,
    ) -> Result<Vec<SortedTriggerEntry>, RiveError> {
        if self.check_deep_recursion(depth, "Deep recursion while scanning topic inheritance!")? {
            return Ok(Vec::new());
        }

        debug!(
            "Collecting trigger list for topic {} (depth={}; inheritance={}; inherited={})",
            topic, depth, inheritance, inherited
        );

        let mut triggers: Vec<SortedTriggerEntry> = Vec::new();
        let mut in_this_topic: Vec<SortedTriggerEntry> = Vec::new();

        if let Some(topic_triggers) = self.topics.get(topic) {
            for trigger in topic_triggers {
                if !thats {
                    in_this_topic.push(SortedTriggerEntry::new(&trigger.pattern, trigger.clone()));
                } else if let Some(previous) = &trigger.previous {
                    in_this_topic.push(SortedTriggerEntry::new(previous, trigger.clone()));
                }
            }
        }

        if let Some(includes) = self.includes.get(topic) {
            for include in includes {
                debug!("Topic {} includes {}", topic, include);
                triggers.extend(self.get_topic_triggers(
                    include,
                    thats,
                    depth + 1,
                    inheritance + 1,
                    false,
                )?);
            }
        }

        if let Some(inherits) = self.inherits.get(topic) {
            for inherit in inherits {
                debug!("Topic {} inherits {}", topic, inherit);
                triggers.extend(self.get_topic_triggers(
                    inherit,
                    thats,
                    depth + 1,
                    inheritance + 1,
                    true,
                )?);
            }
        }

        let has_inherits = self
            .inherits
            .get(topic)
            .map(|set| !set.is_empty())
            .unwrap_or(false);

        if has_inherits || inherited {
            for entry in in_this_topic {
                debug!("Prefixing trigger with {{inherits={}}} {}", inheritance, entry.trigger);
                let label = format!("{{inherits={}}}{}", inheritance, entry.trigger);
                triggers.push(SortedTriggerEntry::new(&label, entry.pointer));
            }
        } else {
            triggers.extend(in_this_topic);
        }

        Ok(triggers)
    }
}

/// Sort one collected trigger set into its final match order.
///
/// `exclude_previous` drops triggers carrying a `%Previous` (they live in
/// the separate thats buffer).
fn sort_trigger_set(
    triggers: Vec<SortedTriggerEntry>,
    exclude_previous: bool,
) -> Vec<SortedTriggerEntry> {
    // Bucket by {weight}, highest first.
    let mut priority: BTreeMap<i64, Vec<SortedTriggerEntry>> = BTreeMap::new();
    for entry in triggers {
        if exclude_previous && entry.pointer.previous.is_some() {
            continue;
        }
        let weight = RE_WEIGHT
            .captures(&entry.trigger)
            .and_then(|caps| caps[1].parse().ok())
            .unwrap_or(0);
        priority.entry(weight).or_default().push(entry);
    }

    let mut running = Vec::new();

    for (weight, group) in priority.into_iter().rev() {
        debug!("Sorting triggers with priority {}", weight);

        // Triggers labelled {inherits=N} sort above unlabelled ones, lowest
        // level first; -1 marks "no label" until the real slot is known.
        let mut track: BTreeMap<i64, SortTrack> = BTreeMap::new();
        let mut highest_inherits: i64 = -1;

        for mut entry in group {
            let inherits = match RE_INHERITS.captures(&entry.trigger) {
                Some(caps) => {
                    let level: i64 = caps[1].parse().unwrap_or(0);
                    entry.trigger = RE_INHERITS.replace_all(&entry.trigger, "").into_owned();
                    level
                }
                None => -1,
            };
            if inherits > highest_inherits {
                highest_inherits = inherits;
            }

            let pattern = entry.trigger.clone();
            let slot = track.entry(inherits).or_default();
            let words = count_words(&pattern, false);

            if pattern.contains('[') {
                slot.option.entry(words).or_default().push(entry);
            } else if pattern.contains('_') {
                if words > 0 {
                    slot.alpha.entry(words).or_default().push(entry);
                } else {
                    slot.under.push(entry);
                }
            } else if pattern.contains('#') {
                if words > 0 {
                    slot.number.entry(words).or_default().push(entry);
                } else {
                    slot.pound.push(entry);
                }
            } else if pattern.contains('*') {
                if words > 0 {
                    slot.wild.entry(words).or_default().push(entry);
                } else {
                    slot.star.push(entry);
                }
            } else {
                slot.atomic.entry(words).or_default().push(entry);
            }
        }

        // Unlabelled triggers slot in just below the deepest inherited level.
        if let Some(unlabelled) = track.remove(&-1) {
            track.insert(highest_inherits + 1, unlabelled);
        }

        for (_, slot) in track {
            running.extend(sort_by_words(slot.atomic));
            running.extend(sort_by_words(slot.option));
            running.extend(sort_by_words(slot.alpha));
            running.extend(sort_by_words(slot.number));
            running.extend(sort_by_words(slot.wild));
            running.extend(sort_by_length(slot.under));
            running.extend(sort_by_length(slot.pound));
            running.extend(sort_by_length(slot.star));
        }
    }

    running
}

/// Flatten word-count buckets, most words first; equal counts order by
/// length descending then pattern text, with arrival order breaking full
/// ties (the sort is stable).
fn sort_by_words(buckets: BTreeMap<usize, Vec<SortedTriggerEntry>>) -> Vec<SortedTriggerEntry> {
    let mut sorted = Vec::new();
    for (_, mut group) in buckets.into_iter().rev() {
        group.sort_by(|a, b| {
            b.trigger
                .len()
                .cmp(&a.trigger.len())
                .then_with(|| a.trigger.cmp(&b.trigger))
        });
        sorted.extend(group);
    }
    sorted
}

/// Order pure-wildcard patterns by length descending, so `* * *` outranks
/// `*`.
fn sort_by_length(mut triggers: Vec<SortedTriggerEntry>) -> Vec<SortedTriggerEntry> {
    triggers.sort_by(|a, b| {
        b.trigger
            .len()
            .cmp(&a.trigger.len())
            .then_with(|| a.trigger.cmp(&b.trigger))
    });
    triggers
}

/// Sort substitution keys: word count descending, then length descending,
/// then natural order.
fn sort_list<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut buckets: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for item in items {
        buckets
            .entry(count_words(item, true))
            .or_default()
            .push(item.clone());
    }

    let mut output = Vec::new();
    for (_, mut group) in buckets.into_iter().rev() {
        group.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        output.extend(group);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pattern: &str) -> SortedTriggerEntry {
        SortedTriggerEntry::new(pattern, Arc::new(Trigger::new(pattern)))
    }

    fn patterns(entries: &[SortedTriggerEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.trigger.as_str()).collect()
    }

    #[test]
    fn atomic_sorts_before_wildcards() {
        let sorted = sort_trigger_set(
            vec![entry("*"), entry("hello bot"), entry("hello *")],
            true,
        );
        assert_eq!(patterns(&sorted), vec!["hello bot", "hello *", "*"]);
    }

    #[test]
    fn word_count_beats_length() {
        let sorted = sort_trigger_set(
            vec![entry("hi"), entry("good morning to you"), entry("goodbye")],
            true,
        );
        assert_eq!(
            patterns(&sorted),
            vec!["good morning to you", "goodbye", "hi"]
        );
    }

    #[test]
    fn weight_outranks_everything() {
        let sorted = sort_trigger_set(
            vec![entry("very long atomic trigger"), entry("* {weight=10}")],
            true,
        );
        assert_eq!(
            patterns(&sorted),
            vec!["* {weight=10}", "very long atomic trigger"]
        );
    }

    #[test]
    fn inherits_levels_stack_lowest_first() {
        let sorted = sort_trigger_set(
            vec![
                entry("{inherits=1}grandparent"),
                entry("{inherits=0}parent trigger"),
                entry("own trigger here"),
            ],
            true,
        );
        // Labels are stripped; unlabelled triggers sink below all levels.
        assert_eq!(
            patterns(&sorted),
            vec!["parent trigger", "grandparent", "own trigger here"]
        );
    }

    #[test]
    fn pure_wildcards_sort_by_length() {
        let sorted = sort_trigger_set(vec![entry("*"), entry("* *")], true);
        assert_eq!(patterns(&sorted), vec!["* *", "*"]);
    }

    #[test]
    fn class_order_is_atomic_option_alpha_number_wild() {
        let sorted = sort_trigger_set(
            vec![
                entry("hello *"),
                entry("hello #"),
                entry("hello _"),
                entry("hello [there]"),
                entry("hello bot"),
            ],
            true,
        );
        assert_eq!(
            patterns(&sorted),
            vec![
                "hello bot",
                "hello [there]",
                "hello _",
                "hello #",
                "hello *"
            ]
        );
    }

    #[test]
    fn previous_triggers_are_excluded_when_asked() {
        let mut with_previous = Trigger::new("* ");
        with_previous.previous = Some("who is there".to_string());
        let sorted = sort_trigger_set(
            vec![
                SortedTriggerEntry::new("*", Arc::new(with_previous)),
                entry("hello"),
            ],
            true,
        );
        assert_eq!(patterns(&sorted), vec!["hello"]);
    }

    #[test]
    fn substitution_keys_sort_longest_first() {
        let keys = vec![
            "what's".to_string(),
            "what is that".to_string(),
            "i'm".to_string(),
        ];
        let sorted = sort_list(keys.iter());
        assert_eq!(sorted, vec!["what is that", "what's", "i'm"]);
    }
}
