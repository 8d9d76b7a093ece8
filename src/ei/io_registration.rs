// Readers for the registered voters table (CSV or Excel).

use std::io::Read;

use calamine::DataType;

use crate::ei::*;

pub fn read_registration(path: &str, src: &RegistrationSource) -> EiResult<RegisteredVoters> {
    info!(
        "Attempting to read registration file {:?} (provider {})",
        path, src.provider
    );
    let (header, rows) = match src.provider.as_str() {
        "csv" => {
            let f = fs::File::open(path).context(OpeningFileSnafu { path })?;
            read_csv_table(f, path)?
        }
        "xlsx" | "excel" => read_excel_table(path, src)?,
        x => whatever!("Registration provider not implemented {:?}", x),
    };
    registration_from_table(&header, &rows, src, path)
}

/// The header and the rows of a CSV file, as strings.
pub fn read_csv_table<R: Read>(reader: R, path: &str) -> EiResult<(Vec<String>, Vec<Vec<String>>)> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let header: Vec<String> = rdr
        .headers()
        .context(CsvLineParseSnafu { path, lineno: 1_usize })?
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut rows: Vec<Vec<String>> = Vec::new();
    for (idx, line_r) in rdr.records().enumerate() {
        // Line 1 is the header.
        let lineno = idx + 2;
        let line = line_r.context(CsvLineParseSnafu { path, lineno })?;
        rows.push(line.iter().map(|s| s.to_string()).collect());
    }
    debug!("read_csv_table: {}: {} rows", path, rows.len());
    Ok((header, rows))
}

fn get_range(path: &str, src: &RegistrationSource) -> EiResult<calamine::Range<DataType>> {
    debug!(
        "get_range: path: {:?} worksheet: {:?}",
        path, &src.excel_worksheet_name
    );
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;

    if let Some(worksheet_name) = &src.excel_worksheet_name {
        let wrange = workbook
            .worksheet_range(worksheet_name)
            .context(MissingWorksheetSnafu {
                path,
                worksheet: worksheet_name.clone(),
            })?
            .context(OpeningExcelSnafu { path })?;
        Ok(wrange)
    } else {
        let all_worksheets = workbook.worksheets();
        match all_worksheets.as_slice() {
            [] => EmptyExcelSnafu { path }.fail(),
            [(worksheet_name, wrange)] => {
                debug!("get_range: path: {:?} worksheet: {:?}", path, worksheet_name);
                Ok(wrange.clone())
            }
            _ => whatever!(
                "{}: {} worksheets, excelWorksheetName must be provided",
                path,
                all_worksheets.len()
            ),
        }
    }
}

fn cell_to_string(cell: &DataType) -> String {
    match cell {
        DataType::String(s) => s.clone(),
        DataType::Int(i) => i.to_string(),
        DataType::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            format!("{}", *f as i64)
        }
        DataType::Float(f) => f.to_string(),
        DataType::Empty => "".to_string(),
        x => format!("{:?}", x),
    }
}

fn read_excel_table(
    path: &str,
    src: &RegistrationSource,
) -> EiResult<(Vec<String>, Vec<Vec<String>>)> {
    let wrange = get_range(path, src)?;
    let mut iter = wrange.rows();
    let header: Vec<String> = iter
        .next()
        .context(EmptyExcelSnafu { path })?
        .iter()
        .map(cell_to_string)
        .collect();
    debug!("read_excel_table: header: {:?}", header);
    let rows: Vec<Vec<String>> = iter
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();
    Ok((header, rows))
}

/// Picks the precinct and count columns out of a table. Blank rows are
/// skipped.
pub fn registration_from_table(
    header: &[String],
    rows: &[Vec<String>],
    src: &RegistrationSource,
    path: &str,
) -> EiResult<RegisteredVoters> {
    let header_refs = header.iter().map(|s| s.as_str());
    let precinct_idx = find_column(header_refs.clone(), &src.precinct_column, 0, path)?;
    let count_idx = find_column(header_refs, &src.count_column, 1, path)?;
    debug!(
        "registration_from_table: precinct column {} count column {}",
        precinct_idx, count_idx
    );

    let mut parsed: Vec<(String, i64)> = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let name = row.get(precinct_idx).cloned().unwrap_or_default();
        let raw_count = row.get(count_idx).map(|s| s.as_str()).unwrap_or("");
        let count = parse_count(raw_count).context(BadCountSnafu {
            path,
            context: format!("row {} ({})", idx + 2, name),
            content: raw_count.to_string(),
        })?;
        parsed.push((name, count));
    }
    let res = RegisteredVoters::from_rows(parsed).context(PreparationSnafu {})?;
    info!(
        "registration_from_table: {}: {} precinct keys",
        simplify_file_name(path),
        res.len()
    );
    Ok(res)
}
