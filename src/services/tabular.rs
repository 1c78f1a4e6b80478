//! Spreadsheet codecs: `;`-separated CSV and XLSX.
//!
//! Decoders hand back raw cell values keyed by header. Nothing here knows
//! what a dish or a category is.

use crate::models::{CellValue, ImportRow, TabularFormat};
use crate::utils::{AppError, Result};
use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, XlsxError};
use std::collections::HashMap;
use std::io::Cursor;

pub const CSV_DELIMITER: u8 = b';';
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const HEADER_BACKGROUND: u32 = 0xD4A017;
const MAX_COLUMN_WIDTH: usize = 50;

/// Rows decoded lazily; an `Err` ends the stream.
pub type RowStream = Box<dyn Iterator<Item = Result<ImportRow>> + Send>;

pub fn decode(format: TabularFormat, bytes: Vec<u8>) -> Result<RowStream> {
    match format {
        TabularFormat::Csv => decode_csv(bytes),
        TabularFormat::Xlsx => decode_xlsx(&bytes),
    }
}

/// Every field quoted, CRLF line ends, no BOM.
pub fn encode_csv(headers: &[&str], rows: &[Vec<CellValue>]) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .delimiter(CSV_DELIMITER)
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::CRLF)
        .from_writer(Vec::new());

    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row.iter().map(|cell| cell.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|e| AppError::Tabular(format!("Failed to flush CSV: {}", e)))
}

/// CSV for download: spreadsheet applications need the BOM to pick UTF-8.
pub fn encode_csv_with_bom(headers: &[&str], rows: &[Vec<CellValue>]) -> Result<Vec<u8>> {
    let mut bytes = UTF8_BOM.to_vec();
    bytes.extend(encode_csv(headers, rows)?);
    Ok(bytes)
}

/// Header plus one example row.
pub fn csv_template(headers: &[&str], example: &[&str]) -> Result<Vec<u8>> {
    let row: Vec<CellValue> = example.iter().map(|v| CellValue::from(*v)).collect();
    encode_csv_with_bom(headers, &[row])
}

/// Streams data rows numbered from 2. A leading BOM is skipped; short rows
/// leave the missing headers absent.
pub fn decode_csv(bytes: Vec<u8>) -> Result<RowStream> {
    let body = match bytes.strip_prefix(UTF8_BOM) {
        Some(rest) => rest.to_vec(),
        None => bytes,
    };

    let mut reader = ReaderBuilder::new()
        .delimiter(CSV_DELIMITER)
        .flexible(true)
        .from_reader(Cursor::new(body));
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let rows = reader
        .into_records()
        .enumerate()
        .map(move |(index, record)| {
            let record: StringRecord = record?;
            let cells = headers
                .iter()
                .zip(record.iter())
                .map(|(header, value)| (header.clone(), CellValue::from(value)))
                .collect();
            Ok(ImportRow {
                number: index + 2,
                cells,
            })
        });
    Ok(Box::new(rows))
}

/// Reads the first worksheet. The first row is the header; columns with a
/// blank header are ignored.
pub fn decode_xlsx(bytes: &[u8]) -> Result<RowStream> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| AppError::Tabular(format!("Failed to open workbook: {}", e)))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::Tabular("Workbook has no worksheets".to_string()))?
        .map_err(|e| AppError::Tabular(format!("Failed to read worksheet: {}", e)))?;

    let mut grid = range.rows();
    let header_map: HashMap<String, usize> = match grid.next() {
        Some(header_row) => header_row
            .iter()
            .enumerate()
            .filter_map(|(idx, cell)| {
                let header = cell_value(cell).to_string();
                (!header.is_empty()).then_some((header, idx))
            })
            .collect(),
        None => HashMap::new(),
    };

    let rows: Vec<Result<ImportRow>> = grid
        .enumerate()
        .map(|(index, row)| {
            let cells = header_map
                .iter()
                .filter_map(|(header, &idx)| row.get(idx).map(|c| (header.clone(), cell_value(c))))
                .collect();
            Ok(ImportRow {
                number: index + 2,
                cells,
            })
        })
        .collect();
    Ok(Box::new(rows.into_iter()))
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        other => CellValue::Text(other.to_string()),
    }
}

/// Single-sheet workbook with a styled header row and bordered cells;
/// columns are sized to their longest value.
pub fn encode_xlsx(title: &str, headers: &[&str], rows: &[Vec<CellValue>]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(title).map_err(xlsx_error)?;

    let header_format = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(HEADER_BACKGROUND))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin);
    let cell_format = Format::new().set_border(FormatBorder::Thin);

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();

    for (col, header) in headers.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, *header, &header_format)
            .map_err(xlsx_error)?;
    }

    for (row_idx, row) in rows.iter().enumerate() {
        let excel_row = (row_idx + 1) as u32;
        for (col, value) in row.iter().enumerate() {
            let excel_col = col as u16;
            let written = match value {
                CellValue::Empty => worksheet.write_blank(excel_row, excel_col, &cell_format),
                CellValue::Text(s) => {
                    worksheet.write_string_with_format(excel_row, excel_col, s, &cell_format)
                }
                CellValue::Int(i) => {
                    worksheet.write_number_with_format(excel_row, excel_col, *i as f64, &cell_format)
                }
                CellValue::Float(f) => {
                    worksheet.write_number_with_format(excel_row, excel_col, *f, &cell_format)
                }
                CellValue::Bool(b) => {
                    worksheet.write_boolean_with_format(excel_row, excel_col, *b, &cell_format)
                }
            };
            written.map_err(xlsx_error)?;

            let len = value.to_string().chars().count();
            match widths.get_mut(col) {
                Some(width) => *width = (*width).max(len),
                None => widths.push(len),
            }
        }
    }

    for (col, width) in widths.iter().enumerate() {
        worksheet
            .set_column_width(col as u16, column_width(*width) as f64)
            .map_err(xlsx_error)?;
    }

    workbook.save_to_buffer().map_err(xlsx_error)
}

pub fn column_width(longest: usize) -> usize {
    (longest + 2).min(MAX_COLUMN_WIDTH)
}

fn xlsx_error(e: XlsxError) -> AppError {
    AppError::Tabular(format!("Failed to write workbook: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADERS: [&str; 3] = ["ID", "Название", "Цена"];

    fn sample_rows() -> Vec<Vec<CellValue>> {
        vec![
            vec![CellValue::Int(1), "Борщ; с пампушками".into(), CellValue::Float(350.5)],
            vec![CellValue::Int(2), "Салат \"Оливье\"".into(), CellValue::Float(290.0)],
            vec![CellValue::Empty, "Морс".into(), CellValue::Int(120)],
        ]
    }

    fn collect(stream: RowStream) -> Vec<ImportRow> {
        stream.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_encode_csv_quotes_everything() {
        let bytes = encode_csv(&HEADERS, &sample_rows()[..1]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "\"ID\";\"Название\";\"Цена\"\r\n\"1\";\"Борщ; с пампушками\";\"350.5\"\r\n"
        );
    }

    #[test]
    fn test_export_carries_bom() {
        let bytes = encode_csv_with_bom(&HEADERS, &[]).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        assert!(!encode_csv(&HEADERS, &[]).unwrap().starts_with(UTF8_BOM));
    }

    #[test]
    fn test_csv_decode_reproduces_encoded_rows() {
        let rows = sample_rows();
        let bytes = encode_csv_with_bom(&HEADERS, &rows).unwrap();
        let decoded = collect(decode_csv(bytes).unwrap());

        assert_eq!(decoded.len(), rows.len());
        for (row, original) in decoded.iter().zip(&rows) {
            assert_eq!(row.cells.len(), HEADERS.len());
            for (header, value) in HEADERS.iter().zip(original) {
                assert_eq!(row.get(header).unwrap().to_string(), value.to_string());
            }
        }
        assert_eq!(decoded[0].number, 2);
        assert_eq!(decoded[2].number, 4);
        assert_eq!(decoded[1].text("Название"), "Салат \"Оливье\"");
    }

    #[test]
    fn test_csv_decode_tolerates_short_rows_and_missing_bom() {
        let text = "ID;Название;Цена\n;Чай\n5;Кофе;150;extra\n";
        let decoded = collect(decode_csv(text.as_bytes().to_vec()).unwrap());

        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].get("Цена").is_none());
        assert_eq!(decoded[0].text("Название"), "Чай");
        assert_eq!(decoded[1].cells.len(), 3);
        assert_eq!(decoded[1].text("Цена"), "150");
    }

    #[test]
    fn test_csv_decode_fails_mid_stream_on_invalid_utf8() {
        let mut bytes = b"ID;Name\n1;ok\n2;".to_vec();
        bytes.extend([0xFF, 0xFE, b'\n']);

        let results: Vec<_> = decode_csv(bytes).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(AppError::Csv(_))));
    }

    #[test]
    fn test_template_has_header_and_example() {
        let bytes = csv_template(&HEADERS, &["", "Пример", "500"]).unwrap();
        let decoded = collect(decode_csv(bytes).unwrap());
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].text("Название"), "Пример");
        assert_eq!(decoded[0].text("ID"), "");
    }

    #[test]
    fn test_xlsx_round_trip_keeps_typed_cells() {
        let bytes = encode_xlsx("Блюда", &HEADERS, &sample_rows()).unwrap();
        assert_eq!(&bytes[0..2], b"PK");

        let decoded = collect(decode_xlsx(&bytes).unwrap());
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].number, 2);
        assert_eq!(decoded[0].text("ID"), "1");
        assert_eq!(decoded[0].text("Название"), "Борщ; с пампушками");
        assert_eq!(decoded[0].get("Цена"), Some(&CellValue::Float(350.5)));
        assert_eq!(decoded[1].text("Цена"), "290");
        assert!(decoded[2].get("ID").map_or(true, CellValue::is_empty));
    }

    #[test]
    fn test_xlsx_decode_rejects_garbage() {
        let result = decode_xlsx(b"not a zip archive");
        assert!(matches!(result, Err(AppError::Tabular(_))));
    }

    #[test]
    fn test_decode_dispatches_on_format() {
        let csv = encode_csv(&HEADERS, &sample_rows()).unwrap();
        assert_eq!(collect(decode(TabularFormat::Csv, csv).unwrap()).len(), 3);

        let xlsx = encode_xlsx("Категории", &HEADERS, &sample_rows()).unwrap();
        assert_eq!(collect(decode(TabularFormat::Xlsx, xlsx).unwrap()).len(), 3);
    }

    #[test]
    fn test_column_width_is_capped() {
        assert_eq!(column_width(4), 6);
        assert_eq!(column_width(48), 50);
        assert_eq!(column_width(300), 50);
    }
}
