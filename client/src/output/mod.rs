//! Rendering of query results for the command line

use anyhow::Result;
use protocol::fesl::{LeaderboardEntry, Persona, SearchHit, StatsRecord};
use protocol::theater::{Attributes, Lobby, Player, Server, ServerDetails};
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    #[default]
    Json,
    Csv,
}

/// Result of one CLI command
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Personas(Vec<Persona>),
    Hits(Vec<SearchHit>),
    Stats(Vec<PlayerStats>),
    Leaderboard(Vec<LeaderboardEntry>),
    Lobbies(Vec<Lobby>),
    Servers(Vec<Server>),
    Details(Box<ServerDetails>),
}

/// Stats of one player, labelled with the id they were fetched for
#[derive(Debug, Serialize)]
pub struct PlayerStats {
    pub user_id: i64,
    pub stats: StatsRecord,
}

/// Row shape used for CSV output
trait Tabular {
    fn columns(&self) -> Vec<(String, String)>;
}

fn cell<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn with_stats(mut columns: Vec<(String, String)>, stats: &StatsRecord) -> Vec<(String, String)> {
    columns.extend(stats.iter().map(|(k, v)| (k.clone(), v.to_string())));
    columns
}

fn with_attributes(
    mut columns: Vec<(String, String)>,
    attributes: &Attributes,
) -> Vec<(String, String)> {
    for (key, value) in attributes {
        if !columns.iter().any(|(name, _)| name == key) {
            columns.push((key.clone(), value.to_string()));
        }
    }
    columns
}

impl Tabular for Persona {
    fn columns(&self) -> Vec<(String, String)> {
        vec![
            ("user_id".into(), self.user_id.to_string()),
            ("name".into(), self.name.clone()),
            ("namespace".into(), cell(&self.namespace)),
            ("master_user_id".into(), cell(&self.master_user_id)),
            ("xuid".into(), cell(&self.xuid)),
        ]
    }
}

impl Tabular for SearchHit {
    fn columns(&self) -> Vec<(String, String)> {
        vec![
            ("id".into(), self.id.to_string()),
            ("name".into(), self.name.clone()),
            ("kind".into(), cell(&self.kind)),
        ]
    }
}

impl Tabular for PlayerStats {
    fn columns(&self) -> Vec<(String, String)> {
        with_stats(vec![("user_id".into(), self.user_id.to_string())], &self.stats)
    }
}

impl Tabular for LeaderboardEntry {
    fn columns(&self) -> Vec<(String, String)> {
        let columns = vec![
            ("rank".into(), self.rank.to_string()),
            ("user_id".into(), self.user_id.to_string()),
            ("name".into(), self.name.clone()),
        ];
        with_stats(columns, &self.stats)
    }
}

impl Tabular for Lobby {
    fn columns(&self) -> Vec<(String, String)> {
        vec![
            ("id".into(), self.id.to_string()),
            ("name".into(), self.name.clone()),
            ("num_games".into(), cell(&self.num_games)),
            ("max_games".into(), cell(&self.max_games)),
        ]
    }
}

impl Tabular for Server {
    fn columns(&self) -> Vec<(String, String)> {
        vec![
            ("lobby_id".into(), self.lobby_id.to_string()),
            ("game_id".into(), self.game_id.to_string()),
            ("name".into(), self.name.clone()),
            ("address".into(), cell(&self.address)),
            ("port".into(), cell(&self.port)),
            ("active_players".into(), cell(&self.active_players)),
            ("max_players".into(), cell(&self.max_players)),
        ]
    }
}

impl Tabular for Player {
    fn columns(&self) -> Vec<(String, String)> {
        let columns = vec![
            ("name".into(), self.name.clone()),
            ("user_id".into(), cell(&self.user_id)),
            ("persona_id".into(), cell(&self.persona_id)),
        ];
        with_attributes(columns, &self.attributes)
    }
}

/// Writes rows as CSV
///
/// Rows may carry different stat keys; the header is the union of column
/// names in first-seen order.
fn write_rows<R: Tabular, W: Write>(rows: &[R], out: W) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let rows: Vec<_> = rows.iter().map(Tabular::columns).collect();
    let mut header: Vec<String> = Vec::new();
    for row in &rows {
        for (name, _) in row {
            if !header.contains(name) {
                header.push(name.clone());
            }
        }
    }

    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&header)?;
    for row in &rows {
        let record = header.iter().map(|name| {
            row.iter()
                .find(|(column, _)| column == name)
                .map(|(_, value)| value.as_str())
                .unwrap_or_default()
        });
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes an outcome to `out` in the requested format
pub fn render<W: Write>(outcome: &Outcome, format: Format, mut out: W) -> Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut out, outcome)?;
            writeln!(out)?;
        }
        Format::Csv => match outcome {
            Outcome::Personas(rows) => write_rows(rows, out)?,
            Outcome::Hits(rows) => write_rows(rows, out)?,
            Outcome::Stats(rows) => write_rows(rows, out)?,
            Outcome::Leaderboard(rows) => write_rows(rows, out)?,
            Outcome::Lobbies(rows) => write_rows(rows, out)?,
            Outcome::Servers(rows) => write_rows(rows, out)?,
            // A table has one row shape; the player list is the tabular part
            Outcome::Details(details) => write_rows(&details.players, out)?,
        },
    }
    Ok(())
}
