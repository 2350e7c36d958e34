//! FILENAME: persistence/src/lib.rs
//! Calcula Persistence Module
//!
//! Saves and loads a `Workbook` in the JSON wire format of §6: a single
//! object with key `sheets` mapped to an ordered list of
//! `{ "name": <string>, "cell-contents": { <UPPERCASE_LOC>: <string>, ... } }`.

mod error;

pub use error::PersistenceError;

use std::io::{Read, Write};

use engine::Workbook;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct WireWorkbook {
    sheets: Vec<WireSheet>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireSheet {
    name: String,
    #[serde(rename = "cell-contents")]
    cell_contents: std::collections::BTreeMap<String, String>,
}

/// Serializes `workbook` to `writer` per the §6 wire format. Sheets are
/// written in display order; cell locations are uppercase; cell contents
/// are each cell's canonical stripped form (`Workbook::non_blank_cells`).
pub fn save_workbook<W: Write>(workbook: &Workbook, writer: W) -> Result<(), PersistenceError> {
    let sheets = workbook
        .list_sheets()
        .into_iter()
        .map(|name| {
            let cell_contents = workbook
                .non_blank_cells(&name)
                .expect("sheet name came from list_sheets, so it must resolve")
                .into_iter()
                .collect();
            trace!("serializing sheet '{}'", name);
            WireSheet { name, cell_contents }
        })
        .collect();

    let wire = WireWorkbook { sheets };
    serde_json::to_writer_pretty(writer, &wire)?;
    Ok(())
}

/// Deserializes a workbook from `reader` and replays its contents onto a
/// fresh `Workbook` (one `new_sheet` + `set_cell_contents` per entry, in
/// document order), so the result picks up every edit-time invariant (edge
/// wiring, cycle detection, orphan tracking) exactly as if the caller had
/// typed it all in by hand.
pub fn load_workbook<R: Read>(reader: R) -> Result<Workbook, PersistenceError> {
    let wire: WireWorkbook = serde_json::from_reader(reader)?;
    if wire.sheets.is_empty() {
        return Err(PersistenceError::Malformed("workbook has no sheets".to_string()));
    }

    let mut workbook = Workbook::new();
    let first_sheet_name = workbook.list_sheets()[0].clone();

    for (i, sheet) in wire.sheets.iter().enumerate() {
        debug!("loading sheet '{}'", sheet.name);
        if i == 0 {
            workbook.rename_sheet(&first_sheet_name, &sheet.name)?;
        } else {
            workbook.new_sheet(Some(sheet.name.clone()))?;
        }
        for (loc, contents) in &sheet.cell_contents {
            workbook.set_cell_contents(&sheet.name, loc, Some(contents.clone()))?;
        }
    }

    Ok(workbook)
}
