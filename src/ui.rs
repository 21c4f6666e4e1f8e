use crate::app::App;
use crate::checkpoint::CheckpointSource;
use crate::numa_node::NodeAllocation;

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph},
};

pub fn draw<S: CheckpointSource>(app: &App<S>, frame: &mut Frame) {
    let [nodes_area, status_area] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(1)]).areas(frame.area());

    draw_status(app, frame, status_area);

    let num_nodes = app.nodes.len();
    if num_nodes == 0 {
        frame.render_widget(
            Paragraph::new("No NUMA nodes found in the topology.")
                .block(Block::default().title("Allocated cores").borders(Borders::ALL)),
            nodes_area,
        );
        return;
    }

    // One column per NUMA node
    let constraints: Vec<Constraint> =
        std::iter::repeat(Constraint::Ratio(1, num_nodes as u32))
            .take(num_nodes)
            .collect();
    let node_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(constraints)
        .split(nodes_area);

    for (node, chunk) in app.nodes.iter().zip(node_chunks.iter()) {
        draw_node(node, frame, *chunk);
    }
}

fn draw_node(node: &NodeAllocation, frame: &mut Frame, area: Rect) {
    let node_block = Block::default()
        .title(format!("NUMA Node {}", node.id))
        .borders(Borders::ALL);
    let inner = node_block.inner(area);
    frame.render_widget(node_block, area);

    let [summary_area, gauge_area] =
        Layout::vertical([Constraint::Length(1), Constraint::Length(1)])
            .margin(1)
            .areas(inner);

    frame.render_widget(
        Paragraph::new(format!(
            "{} of {} cores pinned",
            node.allocated_cores, node.total_cores
        )),
        summary_area,
    );

    let ratio = node.ratio();
    let color = if ratio >= 0.9 {
        Color::Red
    } else if ratio >= 0.5 {
        Color::Yellow
    } else {
        Color::Green
    };
    let gauge = Gauge::default()
        .gauge_style(
            Style::default()
                .fg(color)
                .bg(Color::Black)
                .add_modifier(Modifier::ITALIC),
        )
        .ratio(ratio)
        .label(format!("{:.0}%", ratio * 100.0));
    frame.render_widget(gauge, gauge_area);
}

fn draw_status<S: CheckpointSource>(app: &App<S>, frame: &mut Frame, area: Rect) {
    let status = match &app.last_error {
        Some(message) => Paragraph::new(message.as_str()).style(Style::default().fg(Color::Red)),
        None if app.unmapped_cores > 0 => Paragraph::new(format!(
            "{}: {} allocated cores have no NUMA node (q to quit)",
            app.reader.checkpoint_file_name(),
            app.unmapped_cores
        ))
        .style(Style::default().fg(Color::Yellow)),
        None => Paragraph::new(format!(
            "{} (q to quit)",
            app.reader.checkpoint_file_name()
        )),
    };
    frame.render_widget(status, area);
}
