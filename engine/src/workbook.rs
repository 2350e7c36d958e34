//! FILENAME: engine/src/workbook.rs
//! PURPOSE: C11 — the host-facing contract (§6): sheet management, cell
//! edits, and the structural operations (move/copy/sort) layered on top of
//! them. Also hosts C13, the change-notification registry.
//! CONTEXT: `DependencyGraph` (C6) is the sole authority on edges; a cell's
//! own `parents`/`children` fields are a best-effort mirror refreshed when
//! that cell's own edges are adopted, never consulted for traversal.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};

use log::{debug, error as log_error, trace, warn};

use parser::Expression;

use crate::cell::{Cell, CellKey, CellType};
use crate::coord::{self, CellCoord};
use crate::cycle;
use crate::dependency_extractor::{collect_references, ReferencedLoc};
use crate::dependency_graph::DependencyGraph;
use crate::error::{CellError, ErrorKind, WorkbookError};
use crate::evaluator::{EvalContext, Evaluator};
use crate::grid::Sheet;
use crate::literal::{classify, ClassifiedContents};
use crate::rewriter;
use crate::scheduler;
use crate::value::CellValue;

type ChangeListener = Box<dyn Fn(&Workbook, &[(String, String)])>;

const SHEET_NAME_PUNCTUATION: &str = "_ -.,:;!?@#$%^&*()";

fn is_valid_sheet_name(name: &str) -> bool {
    if name.is_empty() || name.trim() != name {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || SHEET_NAME_PUNCTUATION.contains(c))
}

/// True if `expr` mentions `sheet_name` (case-insensitively) anywhere, used
/// to decide which formulas need rewriting on a rename.
fn mentions_sheet(expr: &Expression, sheet_name: &str) -> bool {
    collect_references(expr)
        .iter()
        .any(|r| r.sheet.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(sheet_name)))
}

fn values_equal(a: &CellValue, b: &CellValue) -> bool {
    match (a, b) {
        (CellValue::Empty, CellValue::Empty) => true,
        (CellValue::Number(x), CellValue::Number(y)) => x == y,
        (CellValue::Text(x), CellValue::Text(y)) => x == y,
        (CellValue::Bool(x), CellValue::Bool(y)) => x == y,
        (CellValue::Error(x), CellValue::Error(y)) => x.kind == y.kind,
        _ => false,
    }
}

/// Special low ranks for Empty/Error ahead of the normal type ordering
/// (§4.11 sort_region).
fn sort_rank(a: &CellValue, b: &CellValue) -> std::cmp::Ordering {
    fn class(v: &CellValue) -> u8 {
        match v {
            CellValue::Empty => 1,
            CellValue::Error(_) => 2,
            CellValue::Number(_) => 3,
            CellValue::Text(_) => 4,
            CellValue::Bool(_) => 5,
        }
    }
    let (ca, cb) = (class(a), class(b));
    if ca != cb {
        return ca.cmp(&cb);
    }
    match (a, b) {
        (CellValue::Number(x), CellValue::Number(y)) => x.cmp(y),
        (CellValue::Text(x), CellValue::Text(y)) => x.to_ascii_uppercase().cmp(&y.to_ascii_uppercase()),
        (CellValue::Bool(x), CellValue::Bool(y)) => x.cmp(y),
        _ => std::cmp::Ordering::Equal,
    }
}

fn remap_after_removal(removed: usize) -> impl Fn(usize) -> Option<usize> {
    move |i| {
        use std::cmp::Ordering::*;
        match i.cmp(&removed) {
            Less => Some(i),
            Equal => None,
            Greater => Some(i - 1),
        }
    }
}

/// A workbook: an ordered set of sheets, the global dependency graph over
/// their cells, the orphan set, and registered change listeners.
pub struct Workbook {
    sheets: Vec<Sheet>,
    name_index: HashMap<String, usize>,
    graph: DependencyGraph,
    orphans: HashSet<CellKey>,
    listeners: Vec<ChangeListener>,
    next_auto_sheet: u32,
}

/// Bridges `Workbook` state into the evaluator for one formula's evaluation,
/// pinned to the sheet the formula lives on (for unqualified references).
struct WorkbookView<'a> {
    workbook: &'a Workbook,
    current_sheet: usize,
}

impl<'a> EvalContext for WorkbookView<'a> {
    fn current_sheet(&self) -> &str {
        &self.workbook.sheets[self.current_sheet].name
    }

    fn sheet_exists(&self, name: &str) -> bool {
        self.workbook.name_index.contains_key(&name.to_ascii_lowercase())
    }

    fn cell_value(&self, sheet: &str, coord: CellCoord) -> CellValue {
        match self.workbook.resolve_sheet_index(sheet) {
            Ok(idx) => self.workbook.cell_value_at(CellKey::new(idx, coord)),
            Err(_) => CellValue::Empty,
        }
    }
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Workbook {
    pub fn new() -> Self {
        let mut wb = Workbook {
            sheets: Vec::new(),
            name_index: HashMap::new(),
            graph: DependencyGraph::new(),
            orphans: HashSet::new(),
            listeners: Vec::new(),
            next_auto_sheet: 1,
        };
        wb.new_sheet(None).expect("the first sheet always succeeds");
        wb
    }

    // ------------------------------------------------------------------
    // Sheet management
    // ------------------------------------------------------------------

    pub fn num_sheets(&self) -> usize {
        self.sheets.len()
    }

    pub fn list_sheets(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn new_sheet(&mut self, name: Option<String>) -> Result<(usize, String), WorkbookError> {
        let resolved_name = match name {
            Some(n) => {
                if !is_valid_sheet_name(&n) {
                    return Err(WorkbookError::InvalidSheetName(n));
                }
                if self.name_index.contains_key(&n.to_ascii_lowercase()) {
                    return Err(WorkbookError::DuplicateSheetName(n));
                }
                n
            }
            None => self.generate_sheet_name(),
        };

        let index = self.sheets.len();
        self.sheets.push(Sheet::new(resolved_name.clone()));
        self.name_index.insert(resolved_name.to_ascii_lowercase(), index);
        debug!("created sheet '{}' at index {}", resolved_name, index);

        let diffs = self.resolve_orphans_for_sheet(&resolved_name);
        self.dispatch(&diffs);
        Ok((index, resolved_name))
    }

    fn generate_sheet_name(&mut self) -> String {
        loop {
            let candidate = format!("Sheet{}", self.next_auto_sheet);
            self.next_auto_sheet += 1;
            if !self.name_index.contains_key(&candidate.to_ascii_lowercase()) {
                return candidate;
            }
        }
    }

    fn generate_copy_name(&self, base: &str) -> String {
        let mut k = 1u32;
        loop {
            let candidate = format!("{}_{}", base, k);
            if !self.name_index.contains_key(&candidate.to_ascii_lowercase()) {
                return candidate;
            }
            k += 1;
        }
    }

    pub fn del_sheet(&mut self, name: &str) -> Result<(), WorkbookError> {
        let idx = self.resolve_sheet_index(name)?;

        // §4.11: every live cell in the doomed sheet becomes #REF!, which
        // cascades BadReference to every dependent anywhere in the
        // workbook, before the sheet itself disappears.
        let locs: Vec<CellCoord> = self.sheets[idx].iter().map(|(c, _)| *c).collect();
        let mut diffs = Vec::new();
        for coord in locs {
            diffs.extend(self.edit_cell(CellKey::new(idx, coord), Some("#REF!".to_string())));
        }

        self.sheets.remove(idx);
        self.reindex_sheets(&remap_after_removal(idx));
        self.rebuild_name_index();

        self.dispatch(&diffs);
        Ok(())
    }

    pub fn rename_sheet(&mut self, old: &str, new: &str) -> Result<(), WorkbookError> {
        let idx = self.resolve_sheet_index(old)?;
        if !is_valid_sheet_name(new) {
            return Err(WorkbookError::InvalidSheetName(new.to_string()));
        }
        if !old.eq_ignore_ascii_case(new) && self.name_index.contains_key(&new.to_ascii_lowercase()) {
            return Err(WorkbookError::DuplicateSheetName(new.to_string()));
        }

        self.sheets[idx].name = new.to_string();
        self.rebuild_name_index();

        let mut to_reedit: Vec<(CellKey, String)> = Vec::new();
        for (sheet_idx, sheet) in self.sheets.iter().enumerate() {
            for (coord, cell) in sheet.iter() {
                if let Some(tree) = &cell.parse_tree {
                    if mentions_sheet(tree, old) {
                        let rewritten = rewriter::rename_sheet(tree, old, new);
                        to_reedit.push((CellKey::new(sheet_idx, *coord), rewriter::render(&rewritten)));
                    }
                }
            }
        }

        let mut diffs = Vec::new();
        for (key, text) in to_reedit {
            diffs.extend(self.edit_cell(key, Some(text)));
        }
        diffs.extend(self.resolve_orphans_for_sheet(new));

        self.dispatch(&diffs);
        Ok(())
    }

    pub fn move_sheet(&mut self, name: &str, index: usize) -> Result<(), WorkbookError> {
        let old_index = self.resolve_sheet_index(name)?;
        if index >= self.sheets.len() {
            return Err(WorkbookError::InvalidIndex(index.to_string()));
        }
        if old_index == index {
            return Ok(());
        }

        let mut order: Vec<usize> = (0..self.sheets.len()).collect();
        let moved = order.remove(old_index);
        order.insert(index, moved);

        let mut mapping = vec![0usize; order.len()];
        for (new_pos, &old_idx) in order.iter().enumerate() {
            mapping[old_idx] = new_pos;
        }
        self.reindex_sheets(&|i| Some(mapping[i]));

        let mut slots: Vec<Option<Sheet>> = self.sheets.drain(..).map(Some).collect();
        let mut reordered = Vec::with_capacity(slots.len());
        for &old_idx in &order {
            reordered.push(slots[old_idx].take().expect("each old index used once"));
        }
        self.sheets = reordered;
        self.rebuild_name_index();
        Ok(())
    }

    pub fn copy_sheet(&mut self, name: &str) -> Result<(usize, String), WorkbookError> {
        let src_idx = self.resolve_sheet_index(name)?;
        let new_name = self.generate_copy_name(name);
        let (new_idx, _) = self.new_sheet(Some(new_name.clone()))?;

        let entries: Vec<(CellCoord, String)> = self.sheets[src_idx]
            .iter()
            .map(|(c, cell)| (*c, cell.contents.clone()))
            .collect();

        for (coord, contents) in entries {
            let loc = coord::stringify_loc(coord, false, false, true);
            self.set_cell_contents(&new_name, &loc, Some(contents))?;
        }

        Ok((new_idx, new_name))
    }

    pub fn get_sheet_extent(&mut self, name: &str) -> Result<(u32, u32), WorkbookError> {
        let idx = self.resolve_sheet_index(name)?;
        Ok(self.sheets[idx].extent())
    }

    fn resolve_sheet_index(&self, name: &str) -> Result<usize, WorkbookError> {
        self.name_index
            .get(&name.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| WorkbookError::UnknownSheet(name.to_string()))
    }

    fn sheet_name_at(&self, idx: usize) -> String {
        self.sheets[idx].name.clone()
    }

    fn rebuild_name_index(&mut self) {
        self.name_index.clear();
        for (i, sheet) in self.sheets.iter().enumerate() {
            self.name_index.insert(sheet.name.to_ascii_lowercase(), i);
        }
    }

    /// Renumbers every `CellKey` (graph edges, orphans, each cell's own
    /// sheet/parents/children fields) through `remap`. `remap` returning
    /// `None` drops the entry — used by `del_sheet`.
    fn reindex_sheets(&mut self, remap: &dyn Fn(usize) -> Option<usize>) {
        let edges: Vec<(CellKey, CellKey)> = self.graph.all_edges().collect();
        let mut by_cell: HashMap<CellKey, HashSet<CellKey>> = HashMap::new();
        for (cell, parent) in edges {
            if let (Some(cs), Some(ps)) = (remap(cell.sheet), remap(parent.sheet)) {
                by_cell
                    .entry(CellKey::new(cs, cell.coord))
                    .or_default()
                    .insert(CellKey::new(ps, parent.coord));
            }
        }
        let mut new_graph = DependencyGraph::new();
        for (cell, parents) in by_cell {
            new_graph.adopt_edges(cell, parents);
        }
        self.graph = new_graph;

        self.orphans = self
            .orphans
            .iter()
            .filter_map(|k| remap(k.sheet).map(|s| CellKey::new(s, k.coord)))
            .collect();

        for sheet in &mut self.sheets {
            for (_, cell) in sheet.iter_mut() {
                if let Some(new_sheet) = remap(cell.sheet) {
                    cell.sheet = new_sheet;
                }
                cell.parents = cell
                    .parents
                    .iter()
                    .filter_map(|k| remap(k.sheet).map(|s| CellKey::new(s, k.coord)))
                    .collect();
                cell.children = cell
                    .children
                    .iter()
                    .filter_map(|k| remap(k.sheet).map(|s| CellKey::new(s, k.coord)))
                    .collect();
            }
        }
    }

    /// Re-runs `set_cell_contents` for every orphan whose invalid sheet
    /// references name `new_name`, now that it exists (§4.6, tail
    /// paragraph).
    fn resolve_orphans_for_sheet(&mut self, new_name: &str) -> Vec<(String, String)> {
        let candidates: Vec<CellKey> = self
            .orphans
            .iter()
            .copied()
            .filter(|k| {
                self.sheets[k.sheet]
                    .get(k.coord)
                    .map(|c| c.invalid_sheet_refs.iter().any(|s| s.eq_ignore_ascii_case(new_name)))
                    .unwrap_or(false)
            })
            .collect();

        let mut diffs = Vec::new();
        for key in candidates {
            let contents = self.sheets[key.sheet].get(key.coord).map(|c| c.contents.clone());
            diffs.extend(self.edit_cell(key, contents));
        }
        diffs
    }

    /// Every non-blank cell on `sheet`, as `(UPPERCASE_LOC, contents)` pairs
    /// in no particular order. Used by `persistence` to build the §6 JSON
    /// wire format; placeholder-empty cells kept alive only because they
    /// have children are not included.
    pub fn non_blank_cells(&self, sheet: &str) -> Result<Vec<(String, String)>, WorkbookError> {
        let idx = self.resolve_sheet_index(sheet)?;
        Ok(self.sheets[idx]
            .iter()
            .filter(|(_, cell)| !matches!(cell.cell_type, CellType::Empty))
            .map(|(coord, cell)| (coord::stringify_loc(*coord, false, false, true), cell.contents.clone()))
            .collect())
    }

    // ------------------------------------------------------------------
    // Cell access and edits
    // ------------------------------------------------------------------

    pub fn get_cell_contents(&self, sheet: &str, loc: &str) -> Result<String, WorkbookError> {
        let idx = self.resolve_sheet_index(sheet)?;
        let (coord, _, _) =
            coord::quantify_loc(loc).ok_or_else(|| WorkbookError::InvalidLocation(loc.to_string()))?;
        Ok(self.sheets[idx].get(coord).map(|c| c.contents.clone()).unwrap_or_default())
    }

    pub fn get_cell_value(&self, sheet: &str, loc: &str) -> Result<CellValue, WorkbookError> {
        let idx = self.resolve_sheet_index(sheet)?;
        let (coord, _, _) =
            coord::quantify_loc(loc).ok_or_else(|| WorkbookError::InvalidLocation(loc.to_string()))?;
        Ok(self.cell_value_at(CellKey::new(idx, coord)))
    }

    pub fn set_cell_contents(
        &mut self,
        sheet: &str,
        loc: &str,
        contents: Option<String>,
    ) -> Result<(), WorkbookError> {
        let sheet_idx = self.resolve_sheet_index(sheet)?;
        let (coord, _, _) =
            coord::quantify_loc(loc).ok_or_else(|| WorkbookError::InvalidLocation(loc.to_string()))?;
        let key = CellKey::new(sheet_idx, coord);
        let diffs = self.edit_cell(key, contents);
        self.dispatch(&diffs);
        Ok(())
    }

    fn cell_value_at(&self, key: CellKey) -> CellValue {
        self.sheets[key.sheet].get(key.coord).map(|c| c.value.clone()).unwrap_or(CellValue::Empty)
    }

    /// §4.9: the five-step edit pipeline. Returns every `(sheet, loc)` whose
    /// value actually changed, for the caller to fold into a notification.
    fn edit_cell(&mut self, key: CellKey, raw: Option<String>) -> Vec<(String, String)> {
        trace!("editing {:?}", key);
        let affected_before = self.graph.transitive_children(key);
        let mut before: HashMap<CellKey, CellValue> = HashMap::new();
        before.insert(key, self.cell_value_at(key));
        for &c in &affected_before {
            before.insert(c, self.cell_value_at(c));
        }

        self.install_cell(key, raw);
        self.recompute(key);

        let affected_after = self.graph.transitive_children(key);
        let mut universe: HashSet<CellKey> = affected_before;
        universe.extend(affected_after);
        universe.insert(key);

        let mut touched = Vec::new();
        for k in universe {
            let new_value = self.cell_value_at(k);
            let changed = match before.get(&k) {
                Some(old) => !values_equal(old, &new_value),
                None => !matches!(new_value, CellValue::Empty),
            };
            if changed {
                touched.push((self.sheet_name_at(k.sheet), coord::stringify_loc(k.coord, false, false, true)));
            }
        }
        touched
    }

    /// §4.6 steps 1-3: release old edges, classify the new contents, and
    /// either delete the cell (blank, no children), store it as an empty
    /// placeholder (blank, has children), or materialize it with its new
    /// type/value/parse tree and adopt its new edges.
    fn install_cell(&mut self, key: CellKey, raw: Option<String>) {
        self.graph.release_edges(key);
        self.orphans.remove(&key);

        let text = raw.as_deref().unwrap_or("");
        let classified = classify(text);

        if matches!(classified, ClassifiedContents::Empty) {
            let has_children = !self.graph.children_of(key).is_empty();
            if has_children {
                self.sheets[key.sheet].set(key.coord, Cell::empty(key.sheet, key.coord));
            } else {
                self.sheets[key.sheet].remove(key.coord);
            }
            return;
        }

        let mut cell = Cell::empty(key.sheet, key.coord);
        match &classified {
            ClassifiedContents::Text(s) => {
                cell.cell_type = CellType::Text;
                cell.value = CellValue::Text(s.clone());
                cell.contents = format!("'{}", s);
            }
            ClassifiedContents::PlainText(s) => {
                cell.cell_type = CellType::Text;
                cell.value = CellValue::Text(s.clone());
                cell.contents = s.clone();
            }
            ClassifiedContents::Number(d) => {
                cell.cell_type = CellType::Number;
                cell.value = CellValue::number(*d);
                cell.contents = cell.value.to_string();
            }
            ClassifiedContents::Bool(b) => {
                cell.cell_type = CellType::Bool;
                cell.value = CellValue::Bool(*b);
                cell.contents = cell.value.to_string();
            }
            ClassifiedContents::Error(kind) => {
                cell.cell_type = CellType::Error;
                cell.value = CellValue::Error(CellError::new(*kind));
                cell.contents = kind.literal().to_string();
            }
            ClassifiedContents::ParseError => {
                cell.cell_type = CellType::Error;
                cell.value = CellValue::Error(CellError::new(ErrorKind::Parse));
                cell.contents = text.trim().to_string();
            }
            ClassifiedContents::Formula(tree) => {
                cell.cell_type = CellType::Formula;
                cell.contents = rewriter::render(tree);
                cell.parse_tree = Some(tree.clone());
                self.wire_formula_edges(&mut cell, key, tree);
            }
            ClassifiedContents::Empty => unreachable!(),
        }

        self.sheets[key.sheet].set(key.coord, cell);
    }

    /// Walks the formula's references, materializing any target cell that
    /// doesn't exist yet, collecting the parent set, and flagging any
    /// sheet name or out-of-grid location it names that can't be resolved.
    fn wire_formula_edges(&mut self, cell: &mut Cell, key: CellKey, tree: &Expression) {
        let refs: HashSet<ReferencedLoc> = collect_references(tree);
        let mut parents = HashSet::new();
        let mut invalid_sheets = HashSet::new();
        let mut bad_reference = false;

        for r in &refs {
            let sheet_idx = match &r.sheet {
                None => Some(key.sheet),
                Some(name) => match self.name_index.get(&name.to_ascii_lowercase()).copied() {
                    Some(idx) => Some(idx),
                    None => {
                        invalid_sheets.insert(name.clone());
                        None
                    }
                },
            };
            let Some(sheet_idx) = sheet_idx else { continue };

            let col_index = match coord::col_to_index(&r.col) {
                Some(c) => c,
                None => {
                    bad_reference = true;
                    continue;
                }
            };
            let target_coord = CellCoord::new(col_index, r.row);
            if !target_coord.in_bounds() {
                bad_reference = true;
                continue;
            }
            let target_key = CellKey::new(sheet_idx, target_coord);
            if !self.sheets[target_key.sheet].contains(target_coord) {
                self.sheets[target_key.sheet].set(target_coord, Cell::empty(target_key.sheet, target_coord));
            }
            parents.insert(target_key);
        }

        if !invalid_sheets.is_empty() {
            cell.invalid_sheet_refs = invalid_sheets;
            self.orphans.insert(key);
        }

        self.graph.adopt_edges(key, parents.clone());
        cell.parents = parents;

        if bad_reference {
            cell.value = CellValue::Error(CellError::new(ErrorKind::BadReference));
        }
    }

    /// §4.9 steps 3-5: detect a cycle touching the edit, flag every cell in
    /// it (and everything downstream of it) as Circular, or otherwise
    /// recompute the edited cell and every dependent in topological order.
    fn recompute(&mut self, key: CellKey) {
        let sccs = cycle::detect_cycles(&self.graph, key);
        if !sccs.is_empty() {
            log_error!("circular reference touching {:?}", key);
            let mut circular: HashSet<CellKey> = HashSet::new();
            for scc in &sccs {
                circular.extend(scc.iter().copied());
            }
            let mut all_affected: HashSet<CellKey> = circular.clone();
            for &c in &circular {
                all_affected.extend(self.graph.transitive_children(c));
            }
            for k in &all_affected {
                if let Some(cell) = self.sheets[k.sheet].get_mut(k.coord) {
                    cell.value = CellValue::Error(CellError::new(ErrorKind::Circular));
                }
            }
            return;
        }

        if let Some(tree) = self.sheets[key.sheet].get(key.coord).and_then(|c| c.parse_tree.clone()) {
            self.evaluate_into(key, &tree);
        }

        for dependent in scheduler::topological_order(&self.graph, key) {
            if let Some(tree) = self.sheets[dependent.sheet].get(dependent.coord).and_then(|c| c.parse_tree.clone()) {
                self.evaluate_into(dependent, &tree);
            }
        }
    }

    fn evaluate_into(&mut self, key: CellKey, tree: &Expression) {
        let (value, misses) = {
            let view = WorkbookView {
                workbook: &*self,
                current_sheet: key.sheet,
            };
            let evaluator = Evaluator::new(&view);
            let value = evaluator.evaluate(tree);
            let misses = evaluator.into_sheet_misses();
            (value, misses)
        };

        if let Some(cell) = self.sheets[key.sheet].get_mut(key.coord) {
            cell.value = value;
            cell.invalid_sheet_refs = misses.clone();
        }
        if misses.is_empty() {
            self.orphans.remove(&key);
        } else {
            self.orphans.insert(key);
        }
    }

    // ------------------------------------------------------------------
    // Structural operations (§4.11)
    // ------------------------------------------------------------------

    pub fn move_cells(
        &mut self,
        sheet: &str,
        start: &str,
        end: &str,
        to: &str,
        to_sheet: Option<&str>,
    ) -> Result<(), WorkbookError> {
        self.transfer_cells(sheet, start, end, to, to_sheet, true)
    }

    pub fn copy_cells(
        &mut self,
        sheet: &str,
        start: &str,
        end: &str,
        to: &str,
        to_sheet: Option<&str>,
    ) -> Result<(), WorkbookError> {
        self.transfer_cells(sheet, start, end, to, to_sheet, false)
    }

    fn transfer_cells(
        &mut self,
        sheet: &str,
        start: &str,
        end: &str,
        to: &str,
        to_sheet: Option<&str>,
        is_move: bool,
    ) -> Result<(), WorkbookError> {
        let src_idx = self.resolve_sheet_index(sheet)?;
        let dst_idx = match to_sheet {
            Some(s) => self.resolve_sheet_index(s)?,
            None => src_idx,
        };

        let (start_coord, _, _) =
            coord::quantify_loc(start).ok_or_else(|| WorkbookError::InvalidLocation(start.to_string()))?;
        let (end_coord, _, _) =
            coord::quantify_loc(end).ok_or_else(|| WorkbookError::InvalidLocation(end.to_string()))?;
        let (dest_anchor, _, _) =
            coord::quantify_loc(to).ok_or_else(|| WorkbookError::InvalidLocation(to.to_string()))?;

        let min_col = start_coord.col.min(end_coord.col);
        let max_col = start_coord.col.max(end_coord.col);
        let min_row = start_coord.row.min(end_coord.row);
        let max_row = start_coord.row.max(end_coord.row);

        let delta_col = dest_anchor.col as i64 - min_col as i64;
        let delta_row = dest_anchor.row as i64 - min_row as i64;
        let width = max_col as i64 - min_col as i64;
        let height = max_row as i64 - min_row as i64;
        if dest_anchor.col as i64 + width > coord::MAX_COL as i64
            || dest_anchor.row as i64 + height > coord::MAX_ROW as i64
        {
            return Err(WorkbookError::OutOfGrid);
        }

        let mut snapshots: Vec<(CellCoord, CellCoord, Option<String>)> = Vec::new();
        for row in min_row..=max_row {
            for col in min_col..=max_col {
                let src_coord = CellCoord::new(col, row);
                let dest_coord = CellCoord::new((col as i64 + delta_col) as u32, (row as i64 + delta_row) as u32);
                let contents = self.sheets[src_idx]
                    .get(src_coord)
                    .map(|c| self.shifted_contents(c, delta_col, delta_row));
                snapshots.push((src_coord, dest_coord, contents));
            }
        }

        let mut diffs = Vec::new();
        if is_move {
            for (src_coord, _, _) in &snapshots {
                diffs.extend(self.edit_cell(CellKey::new(src_idx, *src_coord), None));
            }
        }
        for (_, dest_coord, contents) in snapshots {
            if contents.is_some() {
                diffs.extend(self.edit_cell(CellKey::new(dst_idx, dest_coord), contents));
            }
        }

        self.dispatch(&diffs);
        Ok(())
    }

    fn shifted_contents(&self, cell: &Cell, delta_col: i64, delta_row: i64) -> String {
        match &cell.parse_tree {
            Some(tree) => rewriter::render(&rewriter::shift(tree, delta_col, delta_row)),
            None => cell.contents.clone(),
        }
    }

    pub fn sort_region(
        &mut self,
        sheet: &str,
        start: &str,
        end: &str,
        sort_cols: &[i32],
    ) -> Result<(), WorkbookError> {
        let idx = self.resolve_sheet_index(sheet)?;
        let (start_coord, _, _) =
            coord::quantify_loc(start).ok_or_else(|| WorkbookError::InvalidLocation(start.to_string()))?;
        let (end_coord, _, _) =
            coord::quantify_loc(end).ok_or_else(|| WorkbookError::InvalidLocation(end.to_string()))?;

        let min_col = start_coord.col.min(end_coord.col);
        let max_col = start_coord.col.max(end_coord.col);
        let min_row = start_coord.row.min(end_coord.row);
        let max_row = start_coord.row.max(end_coord.row);
        let width = (max_col - min_col + 1) as i32;

        if sort_cols.is_empty() || sort_cols.iter().any(|&c| c == 0 || c.abs() > width) {
            return Err(WorkbookError::InvalidSortColumns(format!("{:?}", sort_cols)));
        }
        let mut seen = HashSet::new();
        if !sort_cols.iter().all(|&c| seen.insert(c.abs())) {
            return Err(WorkbookError::InvalidSortColumns("duplicate sort column".to_string()));
        }

        let mut rows: Vec<(u32, Vec<CellValue>)> = Vec::new();
        for row in min_row..=max_row {
            let key_values = sort_cols
                .iter()
                .map(|&c| {
                    let col = min_col + (c.unsigned_abs() - 1);
                    self.cell_value_at(CellKey::new(idx, CellCoord::new(col, row)))
                })
                .collect();
            rows.push((row, key_values));
        }

        rows.sort_by(|a, b| {
            for (i, &col) in sort_cols.iter().enumerate() {
                let ord = sort_rank(&a.1[i], &b.1[i]);
                let ord = if col < 0 { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });

        let mut originals: HashMap<u32, Vec<(CellCoord, Option<String>)>> = HashMap::new();
        for row in min_row..=max_row {
            let cells = (min_col..=max_col)
                .map(|col| {
                    let coord = CellCoord::new(col, row);
                    (coord, self.sheets[idx].get(coord).map(|c| c.contents.clone()))
                })
                .collect();
            originals.insert(row, cells);
        }

        let mut diffs = Vec::new();
        for (k, (original_row, _)) in rows.iter().enumerate() {
            let dest_row = min_row + k as u32;
            let delta_row = dest_row as i64 - *original_row as i64;
            if delta_row == 0 {
                continue;
            }
            for (coord, contents) in &originals[original_row] {
                let dest_coord = CellCoord::new(coord.col, dest_row);
                let shifted = contents.as_ref().map(|raw| match classify(raw) {
                    ClassifiedContents::Formula(tree) => rewriter::render(&rewriter::shift(&tree, 0, delta_row)),
                    _ => raw.clone(),
                });
                diffs.extend(self.edit_cell(CellKey::new(idx, dest_coord), shifted));
            }
        }

        self.dispatch(&diffs);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Change notifications (C13)
    // ------------------------------------------------------------------

    pub fn notify_cells_changed<F>(&mut self, listener: F)
    where
        F: Fn(&Workbook, &[(String, String)]) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    fn dispatch(&self, diffs: &[(String, String)]) {
        if diffs.is_empty() {
            return;
        }
        for listener in &self.listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(self, diffs)));
            if outcome.is_err() {
                warn!("a change-notification listener panicked; isolating and continuing");
            }
        }
    }
}
