use anyhow::{anyhow, Result};
use clap::Args;
use dbikit::database::{ColumnInfo, ColumnType, Dialect, TableSchema};
use serde::Serialize;

use super::print_json;

/// Arguments for the Ddl command
#[derive(Args)]
pub struct DdlArgs {
    /// Table name
    #[clap(value_name = "TABLE")]
    pub table: String,

    /// Column as NAME:TYPE[(SIZE)][:FLAG,...], e.g. `id:int:pk,autoinc` or
    /// `title:string(80):notnull,unicode`. Types: int, int64, double,
    /// string, date, datetime.
    #[clap(value_name = "COLUMN", required = true)]
    pub columns: Vec<String>,

    /// Only print the DDL for one dialect: sqlite3, mysql or pgsql
    #[clap(short, long)]
    pub dialect: Option<String>,
}

#[derive(Debug, Serialize)]
struct DdlReport {
    table: TableSchema,
    statements: Vec<DialectDdl>,
}

#[derive(Debug, Serialize)]
struct DialectDdl {
    dialect: Dialect,
    create_table: String,
}

pub fn run(args: DdlArgs, json: bool) {
    let report = match build(&args) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if json {
        print_json(&report);
        return;
    }
    for statement in report.statements {
        println!("-- {}", statement.dialect);
        println!("{};", statement.create_table);
    }
}

fn build(args: &DdlArgs) -> Result<DdlReport> {
    let columns = args
        .columns
        .iter()
        .map(|c| parse_column(c))
        .collect::<Result<Vec<_>>>()?;
    let table = TableSchema::new(&args.table, columns);

    let dialects = match &args.dialect {
        Some(name) => {
            vec![Dialect::from_name(name).ok_or_else(|| anyhow!("unknown dialect '{}'", name))?]
        }
        None => Dialect::all().to_vec(),
    };

    let statements = dialects
        .into_iter()
        .map(|dialect| DialectDdl {
            dialect,
            create_table: dialect.provider().create_table_ddl(&table),
        })
        .collect();
    Ok(DdlReport { table, statements })
}

fn parse_column(spec: &str) -> Result<ColumnInfo> {
    let mut parts = spec.splitn(3, ':');
    let name = parts.next().filter(|n| !n.is_empty());
    let type_part = parts.next();
    let (Some(name), Some(type_part)) = (name, type_part) else {
        return Err(anyhow!("column '{}' must look like NAME:TYPE", spec));
    };

    let (type_name, size) = match type_part.split_once('(') {
        Some((type_name, rest)) => {
            let size = rest
                .strip_suffix(')')
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| anyhow!("invalid size in column '{}'", spec))?;
            (type_name, Some(size))
        }
        None => (type_part, None),
    };
    let col_type = ColumnType::from_name(type_name)
        .ok_or_else(|| anyhow!("unknown column type '{}'", type_name))?;

    let mut info = ColumnInfo::new(name, col_type);
    if let Some(size) = size {
        info = info.size(size);
    }
    for flag in parts.next().unwrap_or("").split(',').filter(|f| !f.is_empty()) {
        info = match flag {
            "pk" | "primary_key" => info.primary_key(),
            "autoinc" => info.autoinc(),
            "notnull" | "not_null" => info.not_null(),
            "unicode" => info.unicode(),
            other => return Err(anyhow!("unknown column flag '{}'", other)),
        };
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_column() {
        let info = parse_column("title:string(80):notnull,unicode").unwrap();
        assert_eq!(info.name, "title");
        assert_eq!(info.col_type, ColumnType::String);
        assert_eq!(info.size, Some(80));
        assert!(info.not_null && info.unicode);
        assert!(!info.primary_key);

        let info = parse_column("id:int:pk,autoinc").unwrap();
        assert!(info.primary_key && info.autoinc);

        assert!(parse_column("id").is_err());
        assert!(parse_column("id:blob").is_err());
        assert!(parse_column("name:string(x)").is_err());
        assert!(parse_column("id:int:sorted").is_err());
    }

    #[test]
    fn test_build_single_dialect() {
        let args = DdlArgs {
            table: "books".to_string(),
            columns: vec!["id:int:pk,autoinc".to_string()],
            dialect: Some("pgsql".to_string()),
        };
        let report = build(&args).unwrap();
        assert_eq!(report.table.name, "books");
        assert_eq!(report.table.columns.len(), 1);
        assert_eq!(report.statements.len(), 1);
        assert_eq!(report.statements[0].dialect, Dialect::Pgsql);
        assert_eq!(
            report.statements[0].create_table,
            "CREATE TABLE books(id serial PRIMARY KEY)"
        );
    }
}
