//! Role and state enumeration tables.
//!
//! Backends report roles and states under slightly different names;
//! rules should not care which backend is underneath. Each table entry
//! has a canonical name plus aliases, and comparing an enum value
//! against any name of its entry is true. Comparing against a name
//! from a different table is not a boolean question at all and yields
//! no answer (the caller maps that to `Undefined`).
//!
//! Tables are process-wide immutable data behind `OnceLock`.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// One named constant in a table, with its accepted spellings.
#[derive(Debug)]
pub struct EnumEntry {
    /// Canonical name, used for display.
    pub name: &'static str,
    /// Alternate spellings, all equivalent to `name`.
    pub aliases: &'static [&'static str],
}

/// An immutable enumeration table (roles, states).
pub struct EnumTable {
    name: &'static str,
    entries: Vec<EnumEntry>,
    index: HashMap<&'static str, usize>,
}

impl EnumTable {
    fn build(name: &'static str, entries: Vec<EnumEntry>) -> Self {
        let mut index = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            let prev = index.insert(entry.name, i);
            debug_assert!(prev.is_none(), "duplicate enum name {}", entry.name);
            for alias in entry.aliases {
                let prev = index.insert(*alias, i);
                debug_assert!(prev.is_none(), "duplicate enum alias {}", alias);
            }
        }
        Self { name, entries, index }
    }

    /// The table's own name ("role", "state").
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up a value by canonical name or alias.
    pub fn value(&'static self, name: &str) -> Option<EnumValue> {
        self.index
            .get(name)
            .map(|&index| EnumValue { table: self, index })
    }

    /// Whether the table knows this spelling at all.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Entry index for a spelling, if known.
    pub fn entry_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in declaration order.
    pub fn entries(&self) -> &[EnumEntry] {
        &self.entries
    }

    /// The value at a raw entry index.
    pub fn value_at(&'static self, index: usize) -> Option<EnumValue> {
        (index < self.entries.len()).then_some(EnumValue { table: self, index })
    }
}

impl fmt::Debug for EnumTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnumTable")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// A value drawn from an [`EnumTable`].
///
/// Two values are equal when they refer to the same entry of the same
/// table, regardless of which alias produced them.
#[derive(Clone, Copy)]
pub struct EnumValue {
    table: &'static EnumTable,
    index: usize,
}

impl EnumValue {
    /// The table this value belongs to.
    pub fn table(&self) -> &'static EnumTable {
        self.table
    }

    /// The entry index inside the table.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Canonical spelling.
    pub fn name(&self) -> &'static str {
        self.table.entries[self.index].name
    }

    /// Compare against an identifier spelling.
    ///
    /// `Some(true)` if the spelling names this entry, `Some(false)` if
    /// it names another entry of the same table, `None` if the table
    /// does not know the spelling.
    pub fn matches_name(&self, name: &str) -> Option<bool> {
        self.table.entry_index(name).map(|i| i == self.index)
    }
}

impl PartialEq for EnumValue {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.table, other.table) && self.index == other.index
    }
}

impl Eq for EnumValue {}

impl std::hash::Hash for EnumValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (self.table as *const EnumTable as usize).hash(state);
        self.index.hash(state);
    }
}

impl fmt::Debug for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.table.name, self.name())
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of states, as a bitset over the states table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StateSet(u64);

impl StateSet {
    /// The empty set.
    pub const EMPTY: StateSet = StateSet(0);

    /// Build a set from state values.
    pub fn from_states(values: impl IntoIterator<Item = EnumValue>) -> Self {
        let mut set = StateSet::EMPTY;
        for value in values {
            set.insert(value);
        }
        set
    }

    /// Add a state. Values from other tables are ignored.
    pub fn insert(&mut self, value: EnumValue) {
        if std::ptr::eq(value.table(), states()) {
            self.0 |= 1u64 << value.index();
        } else {
            tracing::debug!(target: "uidom_tree::tables", value = %value, "non-state value ignored by state set");
        }
    }

    /// Remove a state.
    pub fn remove(&mut self, value: EnumValue) {
        if std::ptr::eq(value.table(), states()) {
            self.0 &= !(1u64 << value.index());
        }
    }

    /// Membership by value.
    pub fn contains(&self, value: EnumValue) -> bool {
        std::ptr::eq(value.table(), states()) && self.0 & (1u64 << value.index()) != 0
    }

    /// Membership by spelling. `None` when the states table does not
    /// know the spelling.
    pub fn contains_name(&self, name: &str) -> Option<bool> {
        states()
            .entry_index(name)
            .map(|i| self.0 & (1u64 << i) != 0)
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of states set.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate the contained states.
    pub fn iter(&self) -> impl Iterator<Item = EnumValue> + '_ {
        let bits = self.0;
        (0..states().len()).filter_map(move |i| {
            (bits & (1u64 << i) != 0).then(|| states().value_at(i)).flatten()
        })
    }
}

impl fmt::Display for StateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, state) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", state)?;
        }
        write!(f, "}}")
    }
}

macro_rules! entries {
    ($(($name:literal $(, $alias:literal)*)),* $(,)?) => {
        vec![$(EnumEntry { name: $name, aliases: &[$($alias),*] }),*]
    };
}

/// The process-wide role table.
pub fn roles() -> &'static EnumTable {
    static ROLES: OnceLock<EnumTable> = OnceLock::new();
    ROLES.get_or_init(|| {
        EnumTable::build(
            "role",
            entries![
                ("unknown"),
                ("application"),
                ("frame", "window"),
                ("dialog"),
                ("alert"),
                ("pane", "panel"),
                ("filler"),
                ("menu_bar", "menubar"),
                ("menu"),
                ("menu_item", "menuitem"),
                ("check_menu_item", "checkmenuitem"),
                ("radio_menu_item", "radiomenuitem"),
                ("tool_bar", "toolbar"),
                ("status_bar", "statusbar"),
                ("push_button", "pushbutton", "button"),
                ("toggle_button", "togglebutton"),
                ("check_box", "checkbox"),
                ("radio_button", "radiobutton"),
                ("combo_box", "combobox"),
                ("spin_button", "spinbutton"),
                ("slider"),
                ("scroll_bar", "scrollbar"),
                ("scroll_pane", "scrollpane"),
                ("progress_bar", "progressbar"),
                ("text", "text_box", "textbox"),
                ("entry"),
                ("password_text", "passwordtext"),
                ("label"),
                ("link", "hyperlink"),
                ("image", "graphic"),
                ("list"),
                ("list_item", "listitem"),
                ("table"),
                ("table_row", "tablerow", "row"),
                ("table_cell", "tablecell", "cell"),
                ("table_column_header", "columnheader"),
                ("table_row_header", "rowheader"),
                ("tree"),
                ("tree_item", "treeitem"),
                ("tree_table", "treetable"),
                ("page_tab", "pagetab", "tab"),
                ("page_tab_list", "pagetablist", "tablist"),
                ("document", "document_frame"),
                ("heading"),
                ("paragraph"),
                ("section"),
                ("separator"),
                ("tool_tip", "tooltip"),
                ("canvas"),
                ("terminal"),
            ],
        )
    })
}

/// The process-wide state table.
pub fn states() -> &'static EnumTable {
    static STATES: OnceLock<EnumTable> = OnceLock::new();
    STATES.get_or_init(|| {
        EnumTable::build(
            "state",
            entries![
                ("active"),
                ("busy"),
                ("checked"),
                ("checkable"),
                ("collapsed"),
                ("editable"),
                ("enabled"),
                ("expandable"),
                ("expanded"),
                ("focusable"),
                ("focused"),
                ("horizontal"),
                ("iconified", "minimized"),
                ("modal"),
                ("multi_line", "multiline"),
                ("multi_selectable", "multiselectable"),
                ("offscreen"),
                ("pressed"),
                ("read_only", "readonly"),
                ("required"),
                ("resizable"),
                ("selectable"),
                ("selected"),
                ("sensitive"),
                ("showing"),
                ("single_line", "singleline"),
                ("vertical"),
                ("visible"),
                ("visited"),
            ],
        )
    })
}

/// Look up a spelling in any table, roles first.
pub fn global_enum_value(name: &str) -> Option<EnumValue> {
    roles().value(name).or_else(|| states().value(name))
}
