// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Row loader turning a credentials spreadsheet into device records.
//!
//! Workbooks (`.xlsx`, `.xlsm`, `.xls`, `.ods`) are decoded with `calamine`
//! and `.csv` files with `csv`; both are first flattened into a [`Table`] so
//! header matching and type coercion are shared. Row order is preserved and
//! ids are not deduplicated.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{self, Error};

/// Connection credentials for one device, read from one input row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
pub struct DeviceRecord
{
    /// Positive device number used to derive every output name.
    pub id:       u32,
    /// Proxy server address.
    pub address:  String,
    /// Proxy server port.
    pub port:     u16,
    /// Proxy account name.
    pub username: String,
    /// Proxy account password.
    pub secret:   String,
}

/// Single decoded cell.
#[derive(Debug, Clone, PartialEq,)]
pub enum Cell
{
    /// Blank cell.
    Empty,
    /// Integer value.
    Int(i64,),
    /// Floating point value; spreadsheets store most numbers this way.
    Float(f64,),
    /// Text value.
    Text(String,),
    /// Boolean value.
    Bool(bool,),
}

impl Cell
{
    /// Wraps text, mapping blank strings to [`Cell::Empty`].
    pub fn text<S: Into<String,>,>(value: S,) -> Self
    {
        let value = value.into();
        if value.trim().is_empty() { Self::Empty } else { Self::Text(value,) }
    }

    fn is_empty(&self,) -> bool
    {
        matches!(self, Self::Empty)
    }

    fn raw(&self,) -> String
    {
        match self {
            Self::Empty => String::new(),
            Self::Int(value,) => value.to_string(),
            Self::Float(value,) => value.to_string(),
            Self::Text(value,) => value.clone(),
            Self::Bool(value,) => value.to_string(),
        }
    }
}

/// Header row plus data rows of the first sheet of an input file.
#[derive(Debug, Clone, PartialEq, Default,)]
pub struct Table
{
    /// Column headers as they appear in the file.
    pub headers: Vec<String,>,
    /// Data rows; rows may be shorter than the header.
    pub rows:    Vec<Vec<Cell,>,>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq,)]
enum Field
{
    Id,
    Address,
    Port,
    Username,
    Secret,
}

/// Accepted headers per field; the first entry is the canonical name.
const COLUMNS: [(Field, &[&str],); 5] = [
    (Field::Id, &["手机编号", "id", "device_id", "device id"],),
    (Field::Address, &["IP", "address", "server", "host"],),
    (Field::Port, &["端口", "port"],),
    (Field::Username, &["用户名", "username", "user"],),
    (Field::Secret, &["密码", "password", "secret", "pwd"],),
];

/// Reads `path` and converts every row into a [`DeviceRecord`].
///
/// # Errors
///
/// Returns [`Error::Io`] when the file does not exist, [`Error::Spreadsheet`]
/// when it cannot be decoded, [`Error::Validation`] when a required column or
/// cell is missing, and [`Error::Coercion`] when a cell has the wrong type.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
///
/// # fn main() -> Result<(), stashgen::Error> {
/// let devices = stashgen::load_records(Path::new("devices.csv"))?;
/// for device in &devices {
///     println!("Phone{} -> {}:{}", device.id, device.address, device.port);
/// }
/// # Ok(())
/// # }
/// ```
pub fn load_records(path: &Path,) -> Result<Vec<DeviceRecord,>, Error,>
{
    let table = read_table(path,)?;
    let records = records_from_table(&table,)?;
    info!("Loaded {} device records from {}", records.len(), path.display());
    Ok(records,)
}

/// Decodes the first sheet of a workbook or a CSV file into a [`Table`].
///
/// # Errors
///
/// See [`load_records`].
pub fn read_table(path: &Path,) -> Result<Table, Error,>
{
    if !path.is_file() {
        return Err(error::io_error(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "input spreadsheet not found",),
        ),);
    }

    let extension = path
        .extension()
        .and_then(|value| value.to_str(),)
        .map(str::to_ascii_lowercase,)
        .unwrap_or_default();

    debug!("Reading {} as '{}' input", path.display(), extension);
    match extension.as_str() {
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => read_workbook(path,),
        "csv" => read_csv(path,),
        other => Err(Error::validation(format!(
            "unsupported input format '{other}' for {}; expected .xlsx, .xls, .ods or .csv",
            path.display()
        ),),),
    }
}

fn read_workbook(path: &Path,) -> Result<Table, Error,>
{
    use calamine::{Data, Reader};

    let mut workbook =
        calamine::open_workbook_auto(path,).map_err(|e| error::spreadsheet_error(path, e,),)?;
    let range = workbook
        .worksheet_range_at(0,)
        .ok_or_else(|| error::spreadsheet_error(path, "workbook has no worksheets",),)?
        .map_err(|e| error::spreadsheet_error(path, e,),)?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|row| row.iter().map(|cell| cell.to_string(),).collect(),)
        .unwrap_or_default();

    let rows = rows
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Data::Empty => Cell::Empty,
                    Data::Int(value,) => Cell::Int(*value,),
                    Data::Float(value,) => Cell::Float(*value,),
                    Data::Bool(value,) => Cell::Bool(*value,),
                    Data::String(value,) => Cell::text(value.as_str(),),
                    other => Cell::text(other.to_string(),),
                },)
                .collect()
        },)
        .collect();

    Ok(Table {
        headers,
        rows,
    },)
}

fn read_csv(path: &Path,) -> Result<Table, Error,>
{
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All,)
        .flexible(true,)
        .from_path(path,)
        .map_err(|e| error::spreadsheet_error(path, e,),)?;

    let headers = reader
        .headers()
        .map_err(|e| error::spreadsheet_error(path, e,),)?
        .iter()
        .map(str::to_owned,)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| error::spreadsheet_error(path, e,),)?;
        rows.push(record.iter().map(Cell::text,).collect(),);
    }

    Ok(Table {
        headers,
        rows,
    },)
}

/// Validates headers and coerces every non-blank row of `table`.
///
/// Fully blank rows are skipped; all other rows must carry every required
/// field.
///
/// # Errors
///
/// Returns [`Error::Validation`] for missing columns or cells and
/// [`Error::Coercion`] for cells that cannot be converted.
pub fn records_from_table(table: &Table,) -> Result<Vec<DeviceRecord,>, Error,>
{
    let layout = ColumnLayout::locate(&table.headers,)?;

    let mut records = Vec::with_capacity(table.rows.len(),);
    for (index, row,) in table.rows.iter().enumerate() {
        if row.iter().all(Cell::is_empty,) {
            debug!("Skipping blank row {}", index + 1);
            continue;
        }
        records.push(layout.record(index + 1, row,)?,);
    }

    report_duplicate_ids(&records,);
    Ok(records,)
}

fn report_duplicate_ids(records: &[DeviceRecord],)
{
    let mut seen = std::collections::HashSet::with_capacity(records.len(),);
    for record in records {
        if !seen.insert(record.id,) {
            warn!("Device id {} appears more than once; later rows overwrite earlier output", record.id);
        }
    }
}

struct ColumnLayout
{
    positions: [(usize, String,); 5],
}

impl ColumnLayout
{
    fn locate(headers: &[String],) -> Result<Self, Error,>
    {
        let normalized: Vec<String,> = headers.iter().map(|header| normalize_header(header,),).collect();

        let mut positions: [(usize, String,); 5] = Default::default();
        for (slot, (field, aliases,),) in COLUMNS.iter().enumerate() {
            let found = normalized.iter().position(|header| {
                aliases.iter().any(|alias| header == &alias.to_lowercase(),)
            },);

            match found {
                Some(position,) => positions[slot] = (position, headers[position].trim().to_owned(),),
                None => {
                    return Err(Error::validation(format!(
                        "input is missing required column '{}' (accepted headers: {}) for field {:?}",
                        aliases[0],
                        aliases.join(", "),
                        field
                    ),),);
                }
            }
        }

        Ok(Self {
            positions,
        },)
    }

    fn cell<'row,>(&self, row: &'row [Cell], field: Field,) -> (&'row Cell, &str,)
    {
        let slot = COLUMNS.iter().position(|(candidate, _,)| *candidate == field,).unwrap_or(0,);
        let (position, header,) = &self.positions[slot];
        (row.get(*position,).unwrap_or(&Cell::Empty,), header.as_str(),)
    }

    fn record(&self, row_number: usize, row: &[Cell],) -> Result<DeviceRecord, Error,>
    {
        let (cell, column,) = self.cell(row, Field::Id,);
        let id = coerce_integer(row_number, column, cell, "a positive device id",)?;
        let id = u32::try_from(id,)
            .ok()
            .filter(|value| *value > 0,)
            .ok_or_else(|| coercion(row_number, column, cell, "a positive device id",),)?;

        let (cell, column,) = self.cell(row, Field::Port,);
        let port = coerce_integer(row_number, column, cell, "a port number (1-65535)",)?;
        let port = u16::try_from(port,)
            .ok()
            .filter(|value| *value > 0,)
            .ok_or_else(|| coercion(row_number, column, cell, "a port number (1-65535)",),)?;

        let (cell, column,) = self.cell(row, Field::Address,);
        let address = coerce_text(row_number, column, cell,)?;
        let (cell, column,) = self.cell(row, Field::Username,);
        let username = coerce_text(row_number, column, cell,)?;
        let (cell, column,) = self.cell(row, Field::Secret,);
        let secret = coerce_text(row_number, column, cell,)?;

        Ok(DeviceRecord {
            id,
            address,
            port,
            username,
            secret,
        },)
    }
}

fn normalize_header(header: &str,) -> String
{
    header.trim_start_matches('\u{feff}',).trim().to_lowercase()
}

fn missing(row: usize, column: &str,) -> Error
{
    Error::validation(format!("row {row} is missing a value for column '{column}'"),)
}

fn coercion(row: usize, column: &str, cell: &Cell, expected: &'static str,) -> Error
{
    Error::Coercion {
        row,
        column: column.to_owned(),
        value: cell.raw(),
        expected,
    }
}

fn coerce_integer(row: usize, column: &str, cell: &Cell, expected: &'static str,) -> Result<i64, Error,>
{
    let integral = |value: f64| {
        (value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64)
            .then_some(value as i64,)
    };

    let value = match cell {
        Cell::Empty => return Err(missing(row, column,),),
        Cell::Int(value,) => Some(*value,),
        Cell::Float(value,) => integral(*value,),
        Cell::Text(text,) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| text.parse::<f64>().ok().and_then(integral,),)
        }
        Cell::Bool(_,) => None,
    };

    value.ok_or_else(|| coercion(row, column, cell, expected,),)
}

fn coerce_text(row: usize, column: &str, cell: &Cell,) -> Result<String, Error,>
{
    let text = match cell {
        Cell::Empty => return Err(missing(row, column,),),
        Cell::Int(value,) => value.to_string(),
        Cell::Float(value,) if value.is_finite() && value.fract() == 0.0 => {
            format!("{value:.0}")
        }
        Cell::Float(value,) => value.to_string(),
        Cell::Text(value,) => value.trim().to_owned(),
        Cell::Bool(value,) => value.to_string(),
    };

    if text.is_empty() {
        return Err(missing(row, column,),);
    }
    Ok(text,)
}

#[cfg(test)]
mod tests
{
    use std::{fs, io::Write};

    use tempfile::tempdir;
    use zip::{ZipWriter, write::SimpleFileOptions};

    use super::*;

    const WORKBOOK_PARTS: [(&str, &str,); 5] = [
        (
            "[Content_Types].xml",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/></Types>"#,
        ),
        (
            "_rels/.rels",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#,
        ),
        (
            "xl/workbook.xml",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Devices" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        ),
        (
            "xl/_rels/workbook.xml.rels",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#,
        ),
        (
            "xl/sharedStrings.xml",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="10" uniqueCount="10"><si><t>手机编号</t></si><si><t>IP</t></si><si><t>端口</t></si><si><t>用户名</t></si><si><t>密码</t></si><si><t>1.2.3.4</t></si><si><t>u</t></si><si><t>5.6.7.8</t></si><si><t>v</t></si><si><t>q</t></si></sst>"#,
        ),
    ];

    /// Header row, a row whose numeric password must load as text, and a
    /// plain text row.
    const DEVICE_SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="s"><v>2</v></c><c r="D1" t="s"><v>3</v></c><c r="E1" t="s"><v>4</v></c></row><row r="2"><c r="A2"><v>1</v></c><c r="B2" t="s"><v>5</v></c><c r="C2"><v>1080</v></c><c r="D2" t="s"><v>6</v></c><c r="E2"><v>123456</v></c></row><row r="3"><c r="A3"><v>2</v></c><c r="B3" t="s"><v>7</v></c><c r="C3"><v>1081</v></c><c r="D3" t="s"><v>8</v></c><c r="E3" t="s"><v>9</v></c></row></sheetData></worksheet>"#;

    fn write_workbook(path: &Path,)
    {
        let file = fs::File::create(path,).expect("failed to create workbook",);
        let mut writer = ZipWriter::new(file,);
        let parts = WORKBOOK_PARTS.iter().copied().chain([("xl/worksheets/sheet1.xml", DEVICE_SHEET,)],);
        for (name, contents,) in parts {
            writer.start_file(name, SimpleFileOptions::default(),).expect("failed to start part",);
            writer.write_all(contents.as_bytes(),).expect("failed to write part",);
        }
        writer.finish().expect("failed to finish workbook",);
    }

    fn headers(names: &[&str],) -> Vec<String,>
    {
        names.iter().map(|name| (*name).to_owned(),).collect()
    }

    fn chinese_headers() -> Vec<String,>
    {
        headers(&["手机编号", "IP", "端口", "用户名", "密码"],)
    }

    #[test]
    fn loads_rows_in_input_order()
    {
        let table = Table {
            headers: chinese_headers(),
            rows:    vec![
                vec![
                    Cell::Float(2.0,),
                    Cell::text("10.0.0.2",),
                    Cell::Float(1080.0,),
                    Cell::text(" alice ",),
                    Cell::text("secret",),
                ],
                vec![
                    Cell::Int(1,),
                    Cell::text("1.2.3.4",),
                    Cell::Int(1081,),
                    Cell::text("u",),
                    Cell::Int(123456,),
                ],
            ],
        };

        let records = records_from_table(&table,).expect("valid table",);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 2);
        assert_eq!(records[0].port, 1080);
        assert_eq!(records[0].username, "alice");
        assert_eq!(records[1].id, 1);
        assert_eq!(records[1].secret, "123456");
    }

    #[test]
    fn english_headers_are_accepted_case_insensitively()
    {
        let table = Table {
            headers: headers(&["ID", "Address", "PORT", "User", "Password"],),
            rows:    vec![vec![
                Cell::text("7",),
                Cell::text("host.example",),
                Cell::text("8080",),
                Cell::text("bob",),
                Cell::text("pw",),
            ]],
        };

        let records = records_from_table(&table,).expect("valid table",);
        assert_eq!(
            records,
            vec![DeviceRecord {
                id:       7,
                address:  "host.example".to_owned(),
                port:     8080,
                username: "bob".to_owned(),
                secret:   "pw".to_owned(),
            }]
        );
    }

    #[test]
    fn missing_column_is_a_validation_error()
    {
        let table = Table {
            headers: headers(&["手机编号", "IP", "用户名", "密码"],),
            rows:    Vec::new(),
        };

        match records_from_table(&table,).expect_err("port column is missing",) {
            Error::Validation {
                message,
            } => assert!(message.contains("端口"), "unexpected message: {message}"),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn blank_required_cell_is_a_validation_error()
    {
        let table = Table {
            headers: chinese_headers(),
            rows:    vec![vec![
                Cell::Int(1,),
                Cell::text("1.2.3.4",),
                Cell::Int(1080,),
                Cell::Empty,
                Cell::text("p",),
            ]],
        };

        let error = records_from_table(&table,).expect_err("username is blank",);
        assert!(matches!(error, Error::Validation { .. }));
    }

    #[test]
    fn non_numeric_port_is_a_coercion_error()
    {
        let table = Table {
            headers: chinese_headers(),
            rows:    vec![vec![
                Cell::Int(1,),
                Cell::text("1.2.3.4",),
                Cell::text("socks",),
                Cell::text("u",),
                Cell::text("p",),
            ]],
        };

        match records_from_table(&table,).expect_err("port is not numeric",) {
            Error::Coercion {
                row,
                column,
                value,
                ..
            } => {
                assert_eq!(row, 1);
                assert_eq!(column, "端口");
                assert_eq!(value, "socks");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn out_of_range_values_are_rejected()
    {
        let row = |id: Cell, port: Cell| {
            vec![id, Cell::text("1.2.3.4",), port, Cell::text("u",), Cell::text("p",)]
        };

        for cells in [
            row(Cell::Int(0,), Cell::Int(1080,),),
            row(Cell::Float(1.5,), Cell::Int(1080,),),
            row(Cell::Int(1,), Cell::Int(0,),),
            row(Cell::Int(1,), Cell::Int(65536,),),
            row(Cell::Int(1,), Cell::Bool(true,),),
        ] {
            let table = Table {
                headers: chinese_headers(), rows: vec![cells],
            };
            let error = records_from_table(&table,).expect_err("value out of range",);
            assert!(matches!(error, Error::Coercion { .. }), "unexpected error: {error:?}");
        }
    }

    #[test]
    fn blank_rows_are_skipped()
    {
        let table = Table {
            headers: chinese_headers(),
            rows:    vec![
                vec![Cell::Empty, Cell::Empty],
                vec![
                    Cell::Int(3,),
                    Cell::text("1.2.3.4",),
                    Cell::Int(1080,),
                    Cell::text("u",),
                    Cell::text("p",),
                ],
            ],
        };

        let records = records_from_table(&table,).expect("valid table",);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 3);
    }

    #[test]
    fn duplicate_ids_are_kept()
    {
        let row = |address: &str| {
            vec![Cell::Int(1,), Cell::text(address,), Cell::Int(1080,), Cell::text("u",), Cell::text("p",)]
        };
        let table = Table {
            headers: chinese_headers(), rows: vec![row("1.1.1.1",), row("2.2.2.2",)],
        };

        let records = records_from_table(&table,).expect("valid table",);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].address, "2.2.2.2");
    }

    #[test]
    fn csv_file_is_loaded()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let path = temp.path().join("devices.csv",);
        fs::write(
            &path,
            "\u{feff}手机编号,IP,端口,用户名,密码\n1, 1.2.3.4 ,1080,u,p\n,,,,\n2,5.6.7.8,1081,v,q\n",
        )
        .expect("failed to write csv",);

        let records = load_records(&path,).expect("csv should load",);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].address, "1.2.3.4");
        assert_eq!(records[1].port, 1081);
    }

    #[test]
    fn xlsx_workbook_is_loaded()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let path = temp.path().join("devices.xlsx",);
        write_workbook(&path,);

        let records = load_records(&path,).expect("workbook should load",);

        assert_eq!(records, vec![
            DeviceRecord {
                id:       1,
                address:  "1.2.3.4".to_owned(),
                port:     1080,
                username: "u".to_owned(),
                secret:   "123456".to_owned(),
            },
            DeviceRecord {
                id:       2,
                address:  "5.6.7.8".to_owned(),
                port:     1081,
                username: "v".to_owned(),
                secret:   "q".to_owned(),
            },
        ]);
    }

    #[test]
    fn missing_input_is_an_io_error()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let error = load_records(&temp.path().join("absent.xlsx",),).expect_err("missing input",);
        assert!(matches!(error, Error::Io { .. }));
    }

    #[test]
    fn unsupported_extension_is_rejected()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let path = temp.path().join("devices.txt",);
        fs::write(&path, "id,ip\n",).expect("failed to write file",);

        let error = load_records(&path,).expect_err("unsupported extension",);
        assert!(matches!(error, Error::Validation { .. }));
    }

    #[test]
    fn corrupt_workbook_is_a_spreadsheet_error()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let path = temp.path().join("devices.xlsx",);
        fs::write(&path, "definitely not a zip archive",).expect("failed to write file",);

        let error = load_records(&path,).expect_err("corrupt workbook",);
        assert!(matches!(error, Error::Spreadsheet { .. }));
    }
}
