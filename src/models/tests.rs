#[cfg(test)]
mod models_tests {
    use crate::models::*;

    #[test]
    fn test_derivative_keys_round_trip() {
        for d in [
            Derivative::TinyBase64,
            Derivative::Thumbnail,
            Derivative::Small,
            Derivative::Medium,
            Derivative::Large,
            Derivative::SmallAvif,
            Derivative::MediumAvif,
            Derivative::LargeAvif,
            Derivative::DominantColor,
        ] {
            assert_eq!(Derivative::from_key(d.key()), Some(d));
        }
        assert_eq!(Derivative::from_key("huge"), None);
    }

    #[test]
    fn test_avif_derivatives_share_stem() {
        assert_eq!(Derivative::SmallAvif.file_stem(), "small");
        assert_eq!(Derivative::SmallAvif.extension(), Some("avif"));
        assert_eq!(Derivative::Large.extension(), Some("webp"));
        assert_eq!(Derivative::TinyBase64.extension(), None);
        assert_eq!(Derivative::Thumbnail.avif_counterpart(), None);
        assert_eq!(Derivative::Medium.avif_counterpart(), Some(Derivative::MediumAvif));
    }

    #[test]
    fn test_derivative_set_serializes_with_snake_case_keys() {
        let mut set = DerivativeSet::new();
        set.insert(Derivative::TinyBase64, "data:image/webp;base64,AAAA");
        set.insert(Derivative::DominantColor, "#aabbcc");

        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["tiny_base64"], "data:image/webp;base64,AAAA");
        assert_eq!(json["dominant_color"], "#aabbcc");

        let map = set.to_map();
        assert_eq!(map.get("dominant_color").map(String::as_str), Some("#aabbcc"));
    }

    #[test]
    fn test_dish_images_with_optimization_keeps_primary_files() {
        let current = DishImages {
            small: Some("/u/1/small_10.webp".to_string()),
            large: Some("/u/1/large_10.webp".to_string()),
            small_avif: Some("/u/1/small_5.avif".to_string()),
            ..DishImages::default()
        };

        let mut regenerated = DerivativeSet::new();
        regenerated.insert(Derivative::TinyBase64, "data:x");
        regenerated.insert(Derivative::DominantColor, "#010203");
        regenerated.insert(Derivative::LargeAvif, "/u/1/large_10.avif");

        let merged = current.with_optimization(&regenerated);
        assert_eq!(merged.small.as_deref(), Some("/u/1/small_10.webp"));
        assert_eq!(merged.tiny_base64.as_deref(), Some("data:x"));
        assert_eq!(merged.large_avif.as_deref(), Some("/u/1/large_10.avif"));
        // Columns missing from the regenerated set are cleared
        assert!(merged.small_avif.is_none());
    }

    #[test]
    fn test_cell_value_display() {
        assert_eq!(CellValue::Empty.to_string(), "");
        assert_eq!(CellValue::Float(500.0).to_string(), "500");
        assert_eq!(CellValue::Float(12.5).to_string(), "12.5");
        assert_eq!(CellValue::Int(-3).to_string(), "-3");
        assert_eq!(CellValue::Bool(true).to_string(), "true");
        assert_eq!(CellValue::from(None::<i64>), CellValue::Empty);
    }

    #[test]
    fn test_import_row_text_trims_and_defaults() {
        let mut row = ImportRow {
            number: 2,
            cells: Default::default(),
        };
        row.cells.insert("Название".to_string(), CellValue::from("  Борщ "));
        row.cells.insert("Вес".to_string(), CellValue::Empty);

        assert_eq!(row.text("Название"), "Борщ");
        assert_eq!(row.text("Вес"), "");
        assert_eq!(row.text("missing"), "");
    }

    #[test]
    fn test_tabular_format_from_filename() {
        assert_eq!(TabularFormat::from_filename("menu.CSV"), Some(TabularFormat::Csv));
        assert_eq!(TabularFormat::from_filename("menu.xlsx"), Some(TabularFormat::Xlsx));
        assert_eq!(TabularFormat::from_filename("menu.xls"), None);
        assert_eq!(TabularFormat::from_filename(""), None);
    }

    #[test]
    fn test_import_summary_fold() {
        let outcomes = vec![
            RowOutcome::Created { row: 2 },
            RowOutcome::Updated { row: 3, id: 7 },
            RowOutcome::Failed {
                row: 4,
                reason: "Строка 4: Пустое название".to_string(),
            },
        ];
        let summary = outcomes
            .iter()
            .fold(ImportSummary::default(), |acc, o| acc.record(o));

        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.errors, vec!["Строка 4: Пустое название".to_string()]);
    }
}
